//! Error types for the MongoDB provider.

use thiserror::Error;

/// Errors that can occur while serving the provider or reconciling a resource.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The server could not be reached or the credentials were rejected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A persisted identifier could not be decoded.
    #[error("Invalid resource ID: {0}")]
    Format(String),

    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A deletion guard refused the operation.
    #[error("Deletion blocked: {0}")]
    Guard(String),

    /// The server rejected an administrative command.
    #[error("Command failed ({code}): {message}")]
    Command {
        /// Server error code, or 0 when the failure did not carry one.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// The server answered with a document of an unexpected shape.
    #[error("Unexpected server response: {0}")]
    Response(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(msg) => msg,
            Self::Format(msg) => msg,
            Self::NotFound(msg) => msg,
            Self::Guard(msg) => msg,
            Self::Command { message, .. } => message,
            Self::Response(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Transport(_err) => "transport error (see Debug output)",
            Self::InvalidRequest(msg) => msg,
        }
    }

    /// Build a command error.
    pub fn command(code: i32, message: impl Into<String>) -> Self {
        Self::Command {
            code,
            message: message.into(),
        }
    }

    /// Whether this is a command error carrying the given server code.
    pub fn is_command_code(&self, expected: i32) -> bool {
        matches!(self, Self::Command { code, .. } if *code == expected)
    }

    /// Prefix the message with what was being attempted.
    ///
    /// The variant is preserved so callers can still match on the kind.
    pub fn context(self, what: impl AsRef<str>) -> Self {
        let what = what.as_ref();
        match self {
            Self::Connection(msg) => Self::Connection(format!("{}: {}", what, msg)),
            Self::Format(msg) => Self::Format(format!("{}: {}", what, msg)),
            Self::NotFound(msg) => Self::NotFound(format!("{}: {}", what, msg)),
            Self::Guard(msg) => Self::Guard(format!("{}: {}", what, msg)),
            Self::Command { code, message } => Self::Command {
                code,
                message: format!("{}: {}", what, message),
            },
            Self::Response(msg) => Self::Response(format!("{}: {}", what, msg)),
            Self::Validation(msg) => Self::Validation(format!("{}: {}", what, msg)),
            Self::Configuration(msg) => Self::Configuration(format!("{}: {}", what, msg)),
            other => other,
        }
    }
}

impl From<mongodb::error::Error> for ProviderError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::Command(command) => Self::Command {
                code: command.code,
                message: command.message.clone(),
            },
            ErrorKind::Authentication { .. }
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Io(_) => Self::Connection(err.to_string()),
            ErrorKind::InvalidArgument { .. } => Self::InvalidRequest(err.to_string()),
            _ => Self::Command {
                code: 0,
                message: err.to_string(),
            },
        }
    }
}

impl From<mongodb::bson::de::Error> for ProviderError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        Self::Response(err.to_string())
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Connection(msg) => tonic::Status::unavailable(msg),
            ProviderError::Format(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Guard(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Command { code, message } => {
                tonic::Status::aborted(format!("command failed ({}): {}", code, message))
            },
            ProviderError::Response(msg) => tonic::Status::internal(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            },
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("user alice in admin".to_string());
        assert_eq!(format!("{}", err), "Resource not found: user alice in admin");

        let err = ProviderError::Guard("deletion protection is enabled".to_string());
        assert_eq!(
            format!("{}", err),
            "Deletion blocked: deletion protection is enabled"
        );

        let err = ProviderError::command(11, "User not found");
        assert_eq!(format!("{}", err), "Command failed (11): User not found");
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::NotFound("x".to_string()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Format("x".to_string()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::Guard("x".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = ProviderError::Connection("x".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Unavailable);

        let status: tonic::Status = ProviderError::command(13, "unauthorized").into();
        assert_eq!(status.code(), tonic::Code::Aborted);
        assert!(status.message().contains("unauthorized"));

        let status: tonic::Status = ProviderError::Configuration("x".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn test_is_command_code() {
        let err = ProviderError::command(11, "UserNotFound");
        assert!(err.is_command_code(11));
        assert!(!err.is_command_code(31));
        assert!(!ProviderError::NotFound("x".to_string()).is_command_code(11));
    }

    #[test]
    fn test_context_keeps_variant() {
        let err = ProviderError::command(51002, "Role already exists").context("could not create role");
        assert!(err.is_command_code(51002));
        assert_eq!(err.message(), "could not create role: Role already exists");

        let err = ProviderError::Format("bad".to_string()).context("reading index");
        assert!(matches!(err, ProviderError::Format(_)));
        assert_eq!(err.message(), "reading index: bad");
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::Configuration("missing host".to_string());
        assert_eq!(err.message(), "missing host");

        let err = ProviderError::InvalidRequest("bad request".to_string());
        assert_eq!(err.message(), "bad request");
    }
}

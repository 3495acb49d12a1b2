//! Opaque resource identifiers.
//!
//! Every managed object is addressed by two or three segments: a database and
//! a name, or a database, a collection and an index name. The segments are
//! joined with `.` and base64 encoded so the identifier survives the host's
//! state store as a single opaque string.
//!
//! Splitting is bounded by the expected segment count, so only the last
//! segment may itself contain a `.`.
//!
//! ```
//! use hemmer_provider_mongodb::id::ResourceId;
//!
//! let id = ResourceId::new(["admin", "alice"]).unwrap();
//! let encoded = id.encode();
//! assert_eq!(encoded, "YWRtaW4uYWxpY2U=");
//!
//! let decoded = ResourceId::decode(&encoded, 2).unwrap();
//! assert_eq!(decoded.segments(), ["admin", "alice"]);
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ProviderError;

/// Separator placed between identifier segments before encoding.
pub const DELIMITER: char = '.';

/// A decoded composite identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    segments: Vec<String>,
}

impl ResourceId {
    /// Build an identifier from its segments.
    ///
    /// Fails with [`ProviderError::Format`] if there are no segments or any
    /// segment is empty.
    pub fn new<I, S>(segments: I) -> Result<Self, ProviderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(ProviderError::Format(
                "an identifier needs at least one segment".to_string(),
            ));
        }
        if let Some(position) = segments.iter().position(String::is_empty) {
            return Err(ProviderError::Format(format!(
                "identifier segment {} is empty",
                position + 1
            )));
        }
        Ok(Self { segments })
    }

    /// Encode the identifier into its persisted form.
    pub fn encode(&self) -> String {
        let joined = self.segments.join(&DELIMITER.to_string());
        STANDARD.encode(joined.as_bytes())
    }

    /// Decode a persisted identifier that must hold exactly `expected` segments.
    pub fn decode(id: &str, expected: usize) -> Result<Self, ProviderError> {
        let bytes = STANDARD.decode(id.as_bytes()).map_err(|err| {
            ProviderError::Format(format!("unexpected format of ID '{}': {}", id, err))
        })?;
        Self::from_joined_bytes(id, bytes, expected)
    }

    /// The decoded segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Consume the identifier and return its segments.
    pub fn into_segments(self) -> Vec<String> {
        self.segments
    }

    /// Re-encode an identifier written by the hex-encoding revision.
    ///
    /// Hex is tried first because every hex string is also valid base64 input.
    /// An identifier that is already base64 is returned unchanged.
    pub fn upgrade_legacy(id: &str, expected: usize) -> Result<String, ProviderError> {
        if let Some(bytes) = decode_hex(id) {
            if let Ok(upgraded) = Self::from_joined_bytes(id, bytes, expected) {
                return Ok(upgraded.encode());
            }
        }
        Self::decode(id, expected).map(|current| current.encode())
    }

    fn from_joined_bytes(id: &str, bytes: Vec<u8>, expected: usize) -> Result<Self, ProviderError> {
        let joined = String::from_utf8(bytes).map_err(|_| {
            ProviderError::Format(format!("ID '{}' does not decode to UTF-8 text", id))
        })?;
        let parts: Vec<&str> = joined.splitn(expected, DELIMITER).collect();
        if parts.len() != expected {
            return Err(ProviderError::Format(format!(
                "unexpected format of ID '{}': expected {} '{}'-separated segments, got {}",
                id,
                expected,
                DELIMITER,
                parts.len()
            )));
        }
        if parts.iter().any(|part| part.is_empty()) {
            return Err(ProviderError::Format(format!(
                "invalid ID format '{}': empty segment in '{}'",
                id, joined
            )));
        }
        Ok(Self {
            segments: parts.into_iter().map(str::to_owned).collect(),
        })
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Encode `{first, second}` into a persisted identifier.
pub fn encode_pair(first: &str, second: &str) -> Result<String, ProviderError> {
    ResourceId::new([first, second]).map(|id| id.encode())
}

/// Encode `{first, second, third}` into a persisted identifier.
pub fn encode_triple(first: &str, second: &str, third: &str) -> Result<String, ProviderError> {
    ResourceId::new([first, second, third]).map(|id| id.encode())
}

/// Decode an identifier holding exactly two segments.
pub fn decode_pair(id: &str) -> Result<(String, String), ProviderError> {
    let mut segments = ResourceId::decode(id, 2)?.into_segments().into_iter();
    match (segments.next(), segments.next()) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(ProviderError::Format(format!("ID '{}' has fewer than 2 segments", id))),
    }
}

/// Decode an identifier holding exactly three segments.
pub fn decode_triple(id: &str) -> Result<(String, String, String), ProviderError> {
    let mut segments = ResourceId::decode(id, 3)?.into_segments().into_iter();
    match (segments.next(), segments.next(), segments.next()) {
        (Some(first), Some(second), Some(third)) => Ok((first, second, third)),
        _ => Err(ProviderError::Format(format!("ID '{}' has fewer than 3 segments", id))),
    }
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.is_empty() || input.len() % 2 != 0 || !input.is_ascii() {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&input[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_two_and_three_segments() {
        let pair = ResourceId::new(["admin", "alice"]).unwrap();
        let decoded = ResourceId::decode(&pair.encode(), 2).unwrap();
        assert_eq!(decoded, pair);

        let triple = ResourceId::new(["shop", "orders", "customer_1_created_-1"]).unwrap();
        let decoded = ResourceId::decode(&triple.encode(), 3).unwrap();
        assert_eq!(decoded.segments(), ["shop", "orders", "customer_1_created_-1"]);
    }

    #[test]
    fn test_last_segment_may_contain_delimiter() {
        let encoded = encode_pair("admin", "app.reader").unwrap();
        let (db, name) = decode_pair(&encoded).unwrap();
        assert_eq!(db, "admin");
        assert_eq!(name, "app.reader");
    }

    #[test]
    fn test_known_encoding_matches_persisted_state() {
        assert_eq!(encode_pair("admin", "alice").unwrap(), "YWRtaW4uYWxpY2U=");
    }

    #[test]
    fn test_new_rejects_empty_segments() {
        let err = ResourceId::new(["admin", ""]).unwrap_err();
        assert!(matches!(err, ProviderError::Format(_)));
        assert!(err.message().contains("segment 2"));

        let err = ResourceId::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ProviderError::Format(_)));
    }

    #[test]
    fn test_decode_rejects_non_base64() {
        let err = ResourceId::decode("not base64 at all!", 2).unwrap_err();
        assert!(matches!(err, ProviderError::Format(_)));
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let encoded = encode_pair("admin", "alice").unwrap();
        let truncated = &encoded[..encoded.len() - 3];
        assert!(matches!(
            ResourceId::decode(truncated, 2),
            Err(ProviderError::Format(_))
        ));
        assert!(matches!(ResourceId::decode("", 2), Err(ProviderError::Format(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        let encoded = STANDARD.encode("justone");
        let err = ResourceId::decode(&encoded, 2).unwrap_err();
        assert!(err.message().contains("expected 2"));

        let pair = encode_pair("db", "coll").unwrap();
        assert!(decode_triple(&pair).is_err());
    }

    #[test]
    fn test_decode_rejects_empty_segment() {
        let encoded = STANDARD.encode("admin.");
        assert!(matches!(
            ResourceId::decode(&encoded, 2),
            Err(ProviderError::Format(_))
        ));

        let encoded = STANDARD.encode(".alice");
        assert!(matches!(
            ResourceId::decode(&encoded, 2),
            Err(ProviderError::Format(_))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let encoded = STANDARD.encode([0xff, 0xfe, b'.', 0xfd]);
        assert!(matches!(
            ResourceId::decode(&encoded, 2),
            Err(ProviderError::Format(_))
        ));
    }

    #[test]
    fn test_upgrade_legacy_hex() {
        // "admin.alice" as hex
        let legacy = "61646d696e2e616c696365";
        let upgraded = ResourceId::upgrade_legacy(legacy, 2).unwrap();
        assert_eq!(upgraded, "YWRtaW4uYWxpY2U=");
    }

    #[test]
    fn test_upgrade_leaves_base64_untouched() {
        let current = encode_triple("shop", "orders", "sku_1").unwrap();
        assert_eq!(ResourceId::upgrade_legacy(&current, 3).unwrap(), current);
    }

    #[test]
    fn test_upgrade_rejects_garbage() {
        assert!(ResourceId::upgrade_legacy("zz-not-an-id", 2).is_err());
    }

    #[test]
    fn test_display_is_encoded_form() {
        let id = ResourceId::new(["db", "coll"]).unwrap();
        assert_eq!(id.to_string(), id.encode());
    }
}

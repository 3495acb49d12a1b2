//! gRPC server for the provider.
//!
//! This module defines the [`ProviderService`] trait the provider implements
//! and the `serve` functions that run it behind the plugin handshake.
//!
//! # Signal Handling
//!
//! The server handles SIGTERM and SIGINT for graceful shutdown. When a signal
//! is received, the server:
//! 1. Stops accepting new connections
//! 2. Waits for in-flight requests to complete, up to the shutdown timeout
//! 3. Calls the provider's `stop()` method
//! 4. Exits cleanly

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn, Span};

use crate::error::ProviderError;
use crate::generated as pb;
use crate::plan::PlanResult;
use crate::schema::{
    has_errors, Attribute, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, NestedBlock,
    ProviderSchema, Schema,
};

/// The protocol version for the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix printed on stdout.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// Server capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Whether the provider supports planning destroy operations.
    pub plan_destroy: bool,
}

/// Operations a provider exposes to the host.
///
/// JSON values stand in for the protocol's byte payloads; the server
/// handles encoding and turns errors into diagnostics.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Return the provider configuration schema and every resource schema.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. By default, this is derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.schema().resources.keys().cloned().collect(),
            capabilities: ServerCapabilities::default(),
        }
    }

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with connection settings.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state written under an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource. A null proposed state plans a destroy.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Read the current state of a resource. Null removes it from state.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing objects into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        _id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        Err(ProviderError::InvalidRequest(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }
}

/// Decode a JSON payload. An empty payload is null.
fn decode_payload(bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
        .map_err(|err| ProviderError::InvalidRequest(format!("payload is not valid JSON: {}", err)))
}

fn encode_payload(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostic_to_proto(diagnostic: Diagnostic) -> pb::Diagnostic {
    let severity = match diagnostic.severity {
        DiagnosticSeverity::Error => pb::diagnostic::Severity::Error,
        DiagnosticSeverity::Warning => pb::diagnostic::Severity::Warning,
    };
    pb::Diagnostic {
        severity: severity as i32,
        summary: diagnostic.summary,
        detail: diagnostic.detail.unwrap_or_default(),
        attribute: diagnostic.attribute.unwrap_or_default(),
    }
}

/// The error diagnostic reported for a failed operation.
fn error_diagnostic(err: ProviderError) -> pb::Diagnostic {
    let detail = match &err {
        ProviderError::Guard(_) => Some("Set deletion_protection to false and apply before destroying."),
        ProviderError::Connection(_) => Some("Check host, port, credentials and certificate."),
        _ => None,
    };
    let mut diagnostic = Diagnostic::error(err.to_string());
    if let Some(detail) = detail {
        diagnostic = diagnostic.with_detail(detail);
    }
    diagnostic_to_proto(diagnostic)
}

/// Split an operation result into its value and the diagnostics to report.
fn outcome<T>(rpc: &'static str, result: Result<T, ProviderError>) -> (Option<T>, Vec<pb::Diagnostic>) {
    match result {
        Ok(value) => {
            info!("{} completed", rpc);
            (Some(value), vec![])
        },
        Err(err) => {
            error!(error = %err, "{} failed", rpc);
            (None, vec![error_diagnostic(err)])
        },
    }
}

/// Like [`outcome`] for operations that answer with diagnostics of their own.
fn checked(rpc: &'static str, result: Result<Vec<Diagnostic>, ProviderError>) -> Vec<pb::Diagnostic> {
    match outcome(rpc, result) {
        (Some(diagnostics), _) => {
            if has_errors(&diagnostics) {
                warn!(count = diagnostics.len(), "{} reported errors", rpc);
            }
            diagnostics.into_iter().map(diagnostic_to_proto).collect()
        },
        (None, errors) => errors,
    }
}

fn state_payload(state: Option<Value>) -> Vec<u8> {
    state.as_ref().map(encode_payload).unwrap_or_default()
}

fn schema_to_proto(schema: &Schema) -> pb::Schema {
    pb::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn attribute_to_proto(name: &str, attr: &Attribute) -> pb::Attribute {
    pb::Attribute {
        name: name.to_string(),
        r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
        required: attr.flags.required,
        optional: attr.flags.optional,
        computed: attr.flags.computed,
        sensitive: attr.flags.sensitive,
        description: attr.description.clone().unwrap_or_default(),
        force_new: attr.force_new,
        default_value: attr.default.as_ref().map(encode_payload).unwrap_or_default(),
    }
}

fn block_to_proto(block: &Block) -> pb::Block {
    let nested_to_proto = |(name, nested): (&String, &NestedBlock)| {
        let nesting_mode = match nested.nesting_mode {
            BlockNestingMode::List => pb::nested_block::NestingMode::List,
            BlockNestingMode::Set => pb::nested_block::NestingMode::Set,
        };
        pb::NestedBlock {
            type_name: name.clone(),
            block: Some(block_to_proto(&nested.block)),
            nesting_mode: nesting_mode as i32,
            min_items: nested.min_items as i32,
            max_items: nested.max_items as i32,
            force_new: nested.force_new,
        }
    };
    pb::Block {
        attributes: block
            .attributes
            .iter()
            .map(|(name, attr)| attribute_to_proto(name, attr))
            .collect(),
        block_types: block.blocks.iter().map(nested_to_proto).collect(),
        description: block.description.clone().unwrap_or_default(),
    }
}

/// Adapts a [`ProviderService`] to the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

type RpcResult<T> = Result<Response<T>, Status>;

#[tonic::async_trait]
impl<P: ProviderService> pb::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(&self, _request: Request<pb::GetMetadataRequest>) -> RpcResult<pb::GetMetadataResponse> {
        let metadata = self.provider.metadata();
        debug!(resources = metadata.resources.len(), "GetMetadata completed");
        Ok(Response::new(pb::GetMetadataResponse {
            server_capabilities: Some(pb::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(&self, _request: Request<pb::GetSchemaRequest>) -> RpcResult<pb::GetSchemaResponse> {
        let schema = self.provider.schema();
        debug!(resources = schema.resources.len(), "GetSchema completed");
        Ok(Response::new(pb::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(name, resource)| (name.clone(), schema_to_proto(resource)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<pb::ValidateProviderConfigRequest>,
    ) -> RpcResult<pb::ValidateProviderConfigResponse> {
        let config = decode_payload(&request.into_inner().config)?;
        let result = self.provider.validate_provider_config(config).await;
        Ok(Response::new(pb::ValidateProviderConfigResponse {
            diagnostics: checked("ValidateProviderConfig", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(&self, request: Request<pb::ConfigureRequest>) -> RpcResult<pb::ConfigureResponse> {
        let config = decode_payload(&request.into_inner().config)?;
        let result = self.provider.configure(config).await;
        Ok(Response::new(pb::ConfigureResponse {
            diagnostics: checked("Configure", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(&self, _request: Request<pb::StopRequest>) -> RpcResult<pb::StopResponse> {
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(err) => {
                error!(error = %err, "Stop failed");
                err.to_string()
            },
        };
        Ok(Response::new(pb::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config", fields(resource_type))]
    async fn validate_resource_config(
        &self,
        request: Request<pb::ValidateResourceConfigRequest>,
    ) -> RpcResult<pb::ValidateResourceConfigResponse> {
        let req = request.into_inner();
        Span::current().record("resource_type", req.resource_type.as_str());
        let config = decode_payload(&req.config)?;
        let result = self.provider.validate_resource_config(&req.resource_type, config).await;
        Ok(Response::new(pb::ValidateResourceConfigResponse {
            diagnostics: checked("ValidateResourceConfig", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.upgrade_resource_state", fields(resource_type, version))]
    async fn upgrade_resource_state(
        &self,
        request: Request<pb::UpgradeResourceStateRequest>,
    ) -> RpcResult<pb::UpgradeResourceStateResponse> {
        let req = request.into_inner();
        Span::current()
            .record("resource_type", req.resource_type.as_str())
            .record("version", req.version);
        let state = decode_payload(&req.raw_state)?;
        let (upgraded, diagnostics) = outcome(
            "UpgradeResourceState",
            self.provider
                .upgrade_resource_state(&req.resource_type, req.version, state)
                .await,
        );
        Ok(Response::new(pb::UpgradeResourceStateResponse {
            upgraded_state: state_payload(upgraded),
            diagnostics,
        }))
    }

    #[instrument(skip_all, name = "grpc.plan", fields(resource_type))]
    async fn plan(&self, request: Request<pb::PlanRequest>) -> RpcResult<pb::PlanResponse> {
        let req = request.into_inner();
        Span::current().record("resource_type", req.resource_type.as_str());
        let prior_state = Some(decode_payload(&req.prior_state)?).filter(|state| !state.is_null());
        let proposed_state = decode_payload(&req.proposed_state)?;
        let config = decode_payload(&req.config)?;

        let (planned, diagnostics) = outcome(
            "Plan",
            self.provider
                .plan(&req.resource_type, prior_state, proposed_state, config)
                .await,
        );
        let Some(planned) = planned else {
            return Ok(Response::new(pb::PlanResponse {
                diagnostics,
                ..Default::default()
            }));
        };
        debug!(
            changes = planned.changes.len(),
            requires_replace = planned.requires_replace,
            "Planned"
        );
        Ok(Response::new(pb::PlanResponse {
            planned_state: encode_payload(&planned.planned_state),
            changes: planned.changes.into_iter().map(Into::into).collect(),
            requires_replace: planned.requires_replace,
            diagnostics,
        }))
    }

    #[instrument(skip_all, name = "grpc.create", fields(resource_type))]
    async fn create(&self, request: Request<pb::CreateRequest>) -> RpcResult<pb::CreateResponse> {
        let req = request.into_inner();
        Span::current().record("resource_type", req.resource_type.as_str());
        let planned_state = decode_payload(&req.planned_state)?;
        let (state, diagnostics) = outcome(
            "Create",
            self.provider.create(&req.resource_type, planned_state).await,
        );
        Ok(Response::new(pb::CreateResponse {
            state: state_payload(state),
            diagnostics,
        }))
    }

    #[instrument(skip_all, name = "grpc.read", fields(resource_type))]
    async fn read(&self, request: Request<pb::ReadRequest>) -> RpcResult<pb::ReadResponse> {
        let req = request.into_inner();
        Span::current().record("resource_type", req.resource_type.as_str());
        let current_state = decode_payload(&req.current_state)?;
        let (state, diagnostics) = outcome(
            "Read",
            self.provider.read(&req.resource_type, current_state).await,
        );
        Ok(Response::new(pb::ReadResponse {
            state: state_payload(state),
            diagnostics,
        }))
    }

    #[instrument(skip_all, name = "grpc.update", fields(resource_type))]
    async fn update(&self, request: Request<pb::UpdateRequest>) -> RpcResult<pb::UpdateResponse> {
        let req = request.into_inner();
        Span::current().record("resource_type", req.resource_type.as_str());
        let prior_state = decode_payload(&req.prior_state)?;
        let planned_state = decode_payload(&req.planned_state)?;
        let (state, diagnostics) = outcome(
            "Update",
            self.provider
                .update(&req.resource_type, prior_state, planned_state)
                .await,
        );
        Ok(Response::new(pb::UpdateResponse {
            state: state_payload(state),
            diagnostics,
        }))
    }

    #[instrument(skip_all, name = "grpc.delete", fields(resource_type))]
    async fn delete(&self, request: Request<pb::DeleteRequest>) -> RpcResult<pb::DeleteResponse> {
        let req = request.into_inner();
        Span::current().record("resource_type", req.resource_type.as_str());
        let current_state = decode_payload(&req.current_state)?;
        let (_, diagnostics) = outcome(
            "Delete",
            self.provider.delete(&req.resource_type, current_state).await,
        );
        Ok(Response::new(pb::DeleteResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state", fields(resource_type, id))]
    async fn import_resource_state(
        &self,
        request: Request<pb::ImportResourceStateRequest>,
    ) -> RpcResult<pb::ImportResourceStateResponse> {
        let req = request.into_inner();
        Span::current()
            .record("resource_type", req.resource_type.as_str())
            .record("id", req.id.as_str());
        let (imported, diagnostics) = outcome(
            "ImportResourceState",
            self.provider.import_resource(&req.resource_type, &req.id).await,
        );
        let imported = imported
            .unwrap_or_default()
            .into_iter()
            .map(|resource| pb::ImportedResource {
                resource_type: resource.resource_type,
                state: encode_payload(&resource.state),
            })
            .collect();
        Ok(Response::new(pb::ImportResourceStateResponse {
            imported,
            diagnostics,
        }))
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may run after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for SIGTERM or SIGINT (CTRL+C on Windows).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        info!("Received CTRL+C, initiating graceful shutdown");
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider as a gRPC server on a free local port.
///
/// Prints the handshake `HEMMER_PROVIDER|<version>|<address>` on stdout and
/// runs until SIGTERM or SIGINT.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options. See [`serve`].
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    serve_on_listener(provider, listener, addr, options).await
}

/// Serve a provider on a specific address.
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Serve a provider on a specific address with custom options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    serve_on_listener(provider, listener, actual_addr, options).await
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);
    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let provider_for_shutdown = Arc::clone(&provider);
    let service = pb::provider_server::ProviderServer::new(ProviderGrpcService { provider });

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async move {
                wait_for_shutdown_signal().await;
                let _ = signalled_tx.send(());
            },
        );
    tokio::pin!(server);

    // The timeout only bounds the drain that follows a signal.
    let outcome = tokio::select! {
        result = &mut server => Some(result),
        Ok(()) = signalled_rx => {
            tokio::time::timeout(options.shutdown_timeout, &mut server).await.ok()
        },
    };

    match outcome {
        Some(Ok(())) => info!("Server shutdown complete"),
        Some(Err(e)) => {
            error!(error = %e, "Server error");
            return Err(ProviderError::from(e).into());
        },
        None => warn!(
            timeout = ?options.shutdown_timeout,
            "Shutdown timeout exceeded, forcing shutdown"
        ),
    }

    debug!("Calling provider stop()");
    if let Err(e) = provider_for_shutdown.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

//! The MongoDB provider: configuration plus dispatch to the reconcilers.
//!
//! Configuration is resolved once by `Configure` and kept behind a lock.
//! Every resource operation opens its own client through the
//! [`Connector`], so a provider can be configured before the server is
//! reachable.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::client::{AdminClient, Connector, MongoConnector};
use crate::config::{
    check_provider_config, provider_config_schema, MissingPolicy, ProviderConfig, ProviderSettings,
};
use crate::error::ProviderError;
use crate::id::ResourceId;
use crate::plan::{plan_resource, PlanResult};
use crate::resources::{
    decode_state, encode_state, CollectionResource, IndexResource, Reconciler, RoleResource,
    UserResource,
};
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::server::{ImportedResource, ProviderMetadata, ProviderService, ServerCapabilities};
use crate::validation;

/// Schema version written by the hex-encoding revision of the identifiers.
const LEGACY_SCHEMA_VERSION: i64 = 0;

/// Current resource schema version.
const SCHEMA_VERSION: i64 = 1;

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// The resource types this provider manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `mongodb_db_user`
    User,
    /// `mongodb_db_role`
    Role,
    /// `mongodb_db_collection`
    Collection,
    /// `mongodb_db_index`
    Index,
}

impl ResourceKind {
    /// Every resource kind.
    pub const ALL: [ResourceKind; 4] = [Self::User, Self::Role, Self::Collection, Self::Index];

    /// Look up a resource type name.
    pub fn from_type_name(resource_type: &str) -> Result<Self, ProviderError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_name() == resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    /// The host's name for this resource type.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::User => UserResource::TYPE_NAME,
            Self::Role => RoleResource::TYPE_NAME,
            Self::Collection => CollectionResource::TYPE_NAME,
            Self::Index => IndexResource::TYPE_NAME,
        }
    }

    /// Number of identifier segments.
    pub fn id_segments(self) -> usize {
        match self {
            Self::User => UserResource::ID_SEGMENTS,
            Self::Role => RoleResource::ID_SEGMENTS,
            Self::Collection => CollectionResource::ID_SEGMENTS,
            Self::Index => IndexResource::ID_SEGMENTS,
        }
    }

    fn type_names() -> Vec<&'static str> {
        Self::ALL.into_iter().map(Self::type_name).collect()
    }
}

/// Bind the reconciler of `$kind` to `$r` and evaluate `$body`.
macro_rules! with_reconciler {
    ($kind:expr, $r:ident => $body:expr) => {
        match $kind {
            ResourceKind::User => {
                let $r = UserResource;
                $body
            },
            ResourceKind::Role => {
                let $r = RoleResource;
                $body
            },
            ResourceKind::Collection => {
                let $r = CollectionResource;
                $body
            },
            ResourceKind::Index => {
                let $r = IndexResource;
                $body
            },
        }
    };
}

/// Provider for MongoDB users, roles, collections and indexes.
pub struct MongoProvider<C: Connector = MongoConnector> {
    connector: C,
    settings: RwLock<Option<ProviderSettings>>,
    env: EnvLookup,
}

impl MongoProvider<MongoConnector> {
    /// A provider connecting with the official driver.
    pub fn new() -> Self {
        Self::with_connector(MongoConnector::new())
    }
}

impl Default for MongoProvider<MongoConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> MongoProvider<C> {
    /// A provider using `connector` for every operation.
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            settings: RwLock::new(None),
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup used to fill unset settings.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(env);
        self
    }

    /// The connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The settings stored by the last successful `Configure`.
    pub async fn settings(&self) -> Option<ProviderSettings> {
        self.settings.read().await.clone()
    }

    async fn connect(&self) -> Result<(Arc<dyn AdminClient>, ProviderSettings), ProviderError> {
        let settings = self.settings.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("provider is not configured".to_string())
        })?;
        let client = self.connector.connect(&settings.client).await?;
        Ok((client, settings))
    }

    fn config_diagnostics(&self, config: &Value) -> (Option<ProviderConfig>, Vec<Diagnostic>) {
        let mut diagnostics = validation::validate(&provider_config_schema(), config);
        match ProviderConfig::from_value(config.clone()) {
            Ok(parsed) => {
                diagnostics.extend(check_provider_config(&parsed, &ResourceKind::type_names()));
                (Some(parsed), diagnostics)
            },
            Err(err) => {
                if !has_errors(&diagnostics) {
                    diagnostics.push(Diagnostic::error(format!("Invalid provider configuration: {}", err)));
                }
                (None, diagnostics)
            },
        }
    }

    fn validate_with<R: Reconciler>(&self, reconciler: &R, config: Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(&reconciler.schema(), &config);
        if has_errors(&diagnostics) {
            return diagnostics;
        }
        match decode_state::<R::State>(config) {
            Ok(desired) => diagnostics.extend(reconciler.validate(&desired)),
            Err(err) => diagnostics.push(Diagnostic::error(err.message())),
        }
        diagnostics
    }

    async fn create_with<R: Reconciler>(&self, reconciler: &R, planned: Value) -> Result<Value, ProviderError> {
        let desired: R::State = decode_state(planned)?;
        let (client, _) = self.connect().await?;
        let created = reconciler.create(client.as_ref(), desired).await?;
        encode_state(&created)
    }

    async fn read_with<R: Reconciler>(&self, reconciler: &R, current: Value) -> Result<Value, ProviderError> {
        let current: R::State = decode_state(current)?;
        let (client, settings) = self.connect().await?;

        match reconciler.read(client.as_ref(), current).await {
            Ok(state) => encode_state(&state),
            Err(ProviderError::NotFound(what))
                if settings.missing.for_resource(R::TYPE_NAME) == MissingPolicy::Remove =>
            {
                warn!(resource_type = R::TYPE_NAME, missing = %what, "Resource is gone, removing it from state");
                Ok(Value::Null)
            },
            Err(err) => Err(err),
        }
    }

    async fn update_with<R: Reconciler>(
        &self,
        reconciler: &R,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: R::State = decode_state(prior)?;
        let planned: R::State = decode_state(planned)?;
        let (client, _) = self.connect().await?;
        let updated = reconciler.update(client.as_ref(), prior, planned).await?;
        encode_state(&updated)
    }

    async fn delete_with<R: Reconciler>(&self, reconciler: &R, current: Value) -> Result<(), ProviderError> {
        let current: R::State = decode_state(current)?;
        reconciler.guard_delete(&current)?;
        let (client, _) = self.connect().await?;
        reconciler.delete(client.as_ref(), current).await
    }

    fn import_with<R: Reconciler>(&self, reconciler: &R, id: &str) -> Result<ImportedResource, ProviderError> {
        let state = reconciler.import(id)?;
        Ok(ImportedResource::new(R::TYPE_NAME, encode_state(&state)?))
    }
}

#[async_trait::async_trait]
impl<C: Connector> ProviderService for MongoProvider<C> {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(provider_config_schema());
        for kind in ResourceKind::ALL {
            schema = with_reconciler!(kind, r => schema.with_resource(kind.type_name(), r.schema()));
        }
        schema
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: ResourceKind::type_names().into_iter().map(String::from).collect(),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(self.config_diagnostics(&config).1)
    }

    #[instrument(skip_all)]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let (parsed, mut diagnostics) = self.config_diagnostics(&config);
        let Some(parsed) = parsed.filter(|_| !has_errors(&diagnostics)) else {
            return Ok(diagnostics);
        };

        match parsed.resolve(&self.env) {
            Ok(settings) => {
                info!(
                    host = %settings.client.host,
                    port = settings.client.port,
                    tls = settings.client.uses_tls(),
                    "Provider configured"
                );
                *self.settings.write().await = Some(settings);
            },
            Err(err) => diagnostics.push(Diagnostic::error(err.message())),
        }
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        debug!("Dropping provider settings");
        *self.settings.write().await = None;
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        Ok(with_reconciler!(kind, r => self.validate_with(&r, config)))
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        mut state: Value,
    ) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        match version {
            SCHEMA_VERSION => Ok(state),
            LEGACY_SCHEMA_VERSION => {
                let legacy = state.get("id").and_then(Value::as_str).map(str::to_string);
                if let (Some(legacy), Some(fields)) = (legacy, state.as_object_mut()) {
                    let upgraded = ResourceId::upgrade_legacy(&legacy, kind.id_segments())?;
                    debug!(resource_type, from = %legacy, to = %upgraded, "Upgraded legacy ID");
                    fields.insert("id".to_string(), Value::String(upgraded));
                }
                Ok(state)
            },
            other => Err(ProviderError::InvalidRequest(format!(
                "{} state has schema version {}, this provider understands up to {}",
                resource_type, other, SCHEMA_VERSION
            ))),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        let schema = with_reconciler!(kind, r => r.schema());
        Ok(plan_resource(&schema, prior_state.as_ref(), &proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        with_reconciler!(kind, r => self.create_with(&r, planned_state).await)
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        if current_state.is_null() {
            return Ok(Value::Null);
        }
        with_reconciler!(kind, r => self.read_with(&r, current_state).await)
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        with_reconciler!(kind, r => self.update_with(&r, prior_state, planned_state).await)
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        with_reconciler!(kind, r => self.delete_with(&r, current_state).await)
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        let imported = with_reconciler!(kind, r => self.import_with(&r, id))?;
        Ok(vec![imported])
    }
}

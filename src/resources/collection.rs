//! `mongodb_db_collection`: collections.

use async_trait::async_trait;
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::{require_id, Reconciler};
use crate::client::AdminClient;
use crate::error::ProviderError;
use crate::id::{decode_pair, encode_pair};
use crate::schema::{Attribute, Diagnostic, Schema};

fn protected() -> bool {
    true
}

/// State of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    /// Encoded `{db, name}`.
    #[serde(default)]
    pub id: Option<String>,
    /// Database holding the collection.
    pub db: String,
    /// Collection name.
    pub name: String,
    /// Refuse to drop the collection.
    #[serde(default = "protected")]
    pub deletion_protection: bool,
}

/// Reconciler for collections.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionResource;

#[async_trait]
impl Reconciler for CollectionResource {
    type State = CollectionState;

    const TYPE_NAME: &'static str = "mongodb_db_collection";
    const ID_SEGMENTS: usize = 2;

    fn schema(&self) -> Schema {
        Schema::new(1)
            .with_description("A MongoDB collection")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "db",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Database holding the collection"),
            )
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Collection name"),
            )
            .with_attribute(
                "deletion_protection",
                Attribute::optional_bool()
                    .with_default(json!(true))
                    .with_description("Refuse to drop the collection while set"),
            )
    }

    #[instrument(skip_all, fields(db = %desired.db, collection = %desired.name))]
    async fn create(
        &self,
        client: &dyn AdminClient,
        desired: CollectionState,
    ) -> Result<CollectionState, ProviderError> {
        let id = encode_pair(&desired.db, &desired.name)?;

        client
            .create_collection(&desired.db, &desired.name)
            .await
            .map_err(|err| err.context(format!("could not create collection {}", desired.name)))?;
        info!("Created collection");

        self.read(
            client,
            CollectionState {
                id: Some(id),
                ..desired
            },
        )
        .await
    }

    #[instrument(skip_all)]
    async fn read(
        &self,
        client: &dyn AdminClient,
        current: CollectionState,
    ) -> Result<CollectionState, ProviderError> {
        let id = require_id(&current.id, Self::TYPE_NAME)?.to_string();
        let (db, name) = decode_pair(&id)?;

        let collections = client
            .list_collections(&db, Some(doc! { "name": name.as_str() }))
            .await?;
        let found = collections
            .iter()
            .any(|collection| collection.get_str("name").is_ok_and(|n| n == name));
        if !found {
            return Err(ProviderError::NotFound(format!(
                "collection {} in database {}",
                name, db
            )));
        }
        debug!(db = %db, collection = %name, "Read collection");

        Ok(CollectionState {
            id: Some(id),
            db,
            name,
            deletion_protection: current.deletion_protection,
        })
    }

    async fn update(
        &self,
        client: &dyn AdminClient,
        prior: CollectionState,
        planned: CollectionState,
    ) -> Result<CollectionState, ProviderError> {
        // Only deletion_protection can change in place, and it never reaches the server.
        self.read(
            client,
            CollectionState {
                id: prior.id,
                ..planned
            },
        )
        .await
    }

    #[instrument(skip_all)]
    async fn delete(
        &self,
        client: &dyn AdminClient,
        current: CollectionState,
    ) -> Result<(), ProviderError> {
        self.guard_delete(&current)?;
        let (db, name) = decode_pair(require_id(&current.id, Self::TYPE_NAME)?)?;

        client
            .drop_collection(&db, &name)
            .await
            .map_err(|err| err.context(format!("could not drop collection {}", name)))?;
        info!(db = %db, collection = %name, "Dropped collection");
        Ok(())
    }

    fn import(&self, id: &str) -> Result<CollectionState, ProviderError> {
        let (db, name) = decode_pair(id)?;
        Ok(CollectionState {
            id: Some(id.to_string()),
            db,
            name,
            deletion_protection: protected(),
        })
    }

    fn guard_delete(&self, current: &CollectionState) -> Result<(), ProviderError> {
        if current.deletion_protection {
            return Err(ProviderError::Guard(format!(
                "Can't delete collection {} because deletion protection is enabled",
                current.name
            )));
        }
        Ok(())
    }

    fn validate(&self, desired: &CollectionState) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if desired.db.contains('.') {
            diagnostics.push(
                Diagnostic::error("db must not contain '.'")
                    .with_detail("The identifier joins the database and collection name with '.'")
                    .with_attribute("db"),
            );
        }
        if desired.name.starts_with("system.") {
            diagnostics.push(
                Diagnostic::error("Collection names starting with 'system.' are reserved")
                    .with_attribute("name"),
            );
        }
        diagnostics
    }
}

//! Resource reconcilers.
//!
//! Each resource type maps its declarative state onto administrative
//! commands. Reconcilers are stateless; the client handle is passed into
//! every operation and identity always comes from the persisted identifier.

pub mod collection;
pub mod index;
pub mod role;
pub mod user;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::AdminClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, Schema};

pub use collection::{CollectionResource, CollectionState};
pub use index::{IndexKey, IndexKeyValue, IndexResource, IndexState};
pub use role::{Privilege, RoleResource, RoleState};
pub use user::{UserResource, UserState};

/// Create, read, update and delete for one resource type.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Declarative state persisted by the host.
    type State: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Resource type name used by the host.
    const TYPE_NAME: &'static str;

    /// Number of segments in this resource's identifier.
    const ID_SEGMENTS: usize;

    /// Declarative schema of the resource.
    fn schema(&self) -> Schema;

    /// Create the object and return the hydrated state.
    async fn create(
        &self,
        client: &dyn AdminClient,
        desired: Self::State,
    ) -> Result<Self::State, ProviderError>;

    /// Refresh the state from the server.
    ///
    /// Fails with [`ProviderError::NotFound`] when the object is gone.
    async fn read(
        &self,
        client: &dyn AdminClient,
        current: Self::State,
    ) -> Result<Self::State, ProviderError>;

    /// Apply a planned change to an existing object.
    async fn update(
        &self,
        client: &dyn AdminClient,
        prior: Self::State,
        planned: Self::State,
    ) -> Result<Self::State, ProviderError>;

    /// Remove the object.
    async fn delete(&self, client: &dyn AdminClient, current: Self::State)
        -> Result<(), ProviderError>;

    /// Build a state holding only what the identifier encodes.
    fn import(&self, id: &str) -> Result<Self::State, ProviderError>;

    /// Refuse a delete before any connection is made.
    fn guard_delete(&self, current: &Self::State) -> Result<(), ProviderError> {
        let _ = current;
        Ok(())
    }

    /// Rules the schema cannot express.
    fn validate(&self, desired: &Self::State) -> Vec<Diagnostic> {
        let _ = desired;
        Vec::new()
    }
}

/// A role granted to a user or inherited by a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleRef {
    /// Role name.
    pub role: String,
    /// Database the role is defined in.
    pub db: String,
}

impl RoleRef {
    /// Create a role reference.
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }

    /// The command form `{role, db}`.
    pub fn to_document(&self) -> Document {
        doc! { "role": self.role.as_str(), "db": self.db.as_str() }
    }

    /// Parse a `{role, db, ...}` entry from a server reply.
    pub fn from_document(document: &Document) -> Result<Self, ProviderError> {
        let role = document
            .get_str("role")
            .map_err(|err| ProviderError::Response(format!("role entry has no role name: {}", err)))?;
        let db = document
            .get_str("db")
            .map_err(|err| ProviderError::Response(format!("role entry has no db: {}", err)))?;
        Ok(Self::new(role, db))
    }
}

/// Command form of a role list; always a list, possibly empty.
pub(crate) fn role_documents(roles: &[RoleRef]) -> Vec<Document> {
    roles.iter().map(RoleRef::to_document).collect()
}

/// Parse the role array `key` of a server document.
pub(crate) fn roles_from_reply(document: &Document, key: &str) -> Result<Vec<RoleRef>, ProviderError> {
    let Ok(entries) = document.get_array(key) else {
        return Ok(Vec::new());
    };
    entries
        .iter()
        .map(|entry| {
            entry
                .as_document()
                .ok_or_else(|| ProviderError::Response(format!("{} entry is not a document", key)))
                .and_then(RoleRef::from_document)
        })
        .collect()
}

/// Schema block of a role reference.
pub(crate) fn role_ref_block() -> Block {
    Block::new()
        .with_attribute(
            "role",
            Attribute::required_string().with_description("Name of the role"),
        )
        .with_attribute(
            "db",
            Attribute::required_string().with_description("Database the role is defined in"),
        )
}

/// Diagnostics for repeated role references.
pub(crate) fn duplicate_roles(roles: &[RoleRef], attribute: &str) -> Vec<Diagnostic> {
    let mut seen = std::collections::BTreeSet::new();
    roles
        .iter()
        .filter(|role| !seen.insert(*role))
        .map(|role| {
            Diagnostic::error(format!("Duplicate role {} in database {}", role.role, role.db))
                .with_attribute(attribute)
        })
        .collect()
}

/// The identifier held in a state, or a format error.
pub(crate) fn require_id<'a>(id: &'a Option<String>, type_name: &str) -> Result<&'a str, ProviderError> {
    id.as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Format(format!("{} state has no id", type_name)))
}

/// Remove null members of objects, recursively.
///
/// The host sends unset optional attributes as null; dropping them lets
/// `#[serde(default)]` fill the field.
pub fn prune_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, prune_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(prune_nulls).collect()),
        other => other,
    }
}

/// Deserialize a host state into a resource state.
pub fn decode_state<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(prune_nulls(value)).map_err(|err| {
        ProviderError::InvalidRequest(format!("state does not match the resource schema: {}", err))
    })
}

/// Serialize a resource state for the host.
pub fn encode_state<T: Serialize>(state: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(state)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_ref_documents() {
        let roles = vec![RoleRef::new("readWrite", "shop"), RoleRef::new("read", "admin")];
        let documents = role_documents(&roles);
        assert_eq!(documents[0], doc! { "role": "readWrite", "db": "shop" });

        let reply = doc! { "roles": documents };
        assert_eq!(roles_from_reply(&reply, "roles").unwrap(), roles);
        assert!(roles_from_reply(&reply, "inheritedRoles").unwrap().is_empty());
    }

    #[test]
    fn test_role_ref_from_malformed_document() {
        let reply = doc! { "roles": [ { "role": "read" } ] };
        assert!(matches!(
            roles_from_reply(&reply, "roles"),
            Err(ProviderError::Response(_))
        ));
    }

    #[test]
    fn test_duplicate_roles() {
        let roles = vec![
            RoleRef::new("read", "shop"),
            RoleRef::new("read", "admin"),
            RoleRef::new("read", "shop"),
        ];
        let diagnostics = duplicate_roles(&roles, "role");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("read in database shop"));
    }

    #[test]
    fn test_prune_nulls() {
        let value = json!({"id": null, "name": "x", "role": [{"db": null, "role": "read"}]});
        assert_eq!(
            prune_nulls(value),
            json!({"name": "x", "role": [{"role": "read"}]})
        );
    }

    #[test]
    fn test_require_id() {
        assert_eq!(require_id(&Some("abc".to_string()), "t").unwrap(), "abc");
        assert!(matches!(require_id(&None, "t"), Err(ProviderError::Format(_))));
        assert!(require_id(&Some(String::new()), "t").is_err());
    }
}

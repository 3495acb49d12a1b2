//! `mongodb_db_role`: user-defined roles.
//!
//! A role is changed by dropping and recreating it, so it is briefly absent
//! during an update.

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument};

use super::{
    duplicate_roles, require_id, role_documents, role_ref_block, roles_from_reply, Reconciler,
    RoleRef,
};
use crate::client::AdminClient;
use crate::error::ProviderError;
use crate::id::{decode_pair, encode_pair};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema};

/// Maximum number of privileges and of inherited roles per role.
pub const MAX_ITEMS: u32 = 10;

/// Database roles are created in when none is given.
pub const DEFAULT_DATABASE: &str = "admin";

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

/// Actions granted on a database or collection.
///
/// An empty `db` or `collection` matches every database or collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    /// Database of the resource.
    #[serde(default)]
    pub db: String,
    /// Collection of the resource.
    #[serde(default)]
    pub collection: String,
    /// Granted actions.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl Privilege {
    /// Create a privilege.
    pub fn new<I, S>(db: impl Into<String>, collection: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            db: db.into(),
            collection: collection.into(),
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }

    /// The command form `{resource: {db, collection}, actions}`.
    pub fn to_document(&self) -> Document {
        doc! {
            "resource": { "db": self.db.as_str(), "collection": self.collection.as_str() },
            "actions": self.actions.clone(),
        }
    }

    /// Flatten a privilege entry from a `rolesInfo` reply.
    pub fn from_document(document: &Document) -> Result<Self, ProviderError> {
        let resource = document.get_document("resource").map_err(|err| {
            ProviderError::Response(format!("privilege entry has no resource: {}", err))
        })?;
        let actions = document
            .get_array("actions")
            .map(|actions| {
                actions
                    .iter()
                    .filter_map(Bson::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            db: resource.get_str("db").unwrap_or_default().to_string(),
            collection: resource.get_str("collection").unwrap_or_default().to_string(),
            actions,
        })
    }
}

/// State of a user-defined role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleState {
    /// Encoded `{database, name}`.
    #[serde(default)]
    pub id: Option<String>,
    /// Database the role is defined in.
    #[serde(default = "default_database")]
    pub database: String,
    /// Role name.
    pub name: String,
    /// Roles this role inherits from.
    #[serde(default)]
    pub inherited_role: Vec<RoleRef>,
    /// Privileges granted directly.
    #[serde(default)]
    pub privilege: Vec<Privilege>,
}

/// Reconciler for user-defined roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleResource;

impl RoleResource {
    async fn create_role(&self, client: &dyn AdminClient, state: &RoleState) -> Result<(), ProviderError> {
        let privileges: Vec<Document> = state.privilege.iter().map(Privilege::to_document).collect();
        let command = doc! {
            "createRole": state.name.as_str(),
            "privileges": privileges,
            "roles": role_documents(&state.inherited_role),
        };
        client.run_command(&state.database, command).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for RoleResource {
    type State = RoleState;

    const TYPE_NAME: &'static str = "mongodb_db_role";
    const ID_SEGMENTS: usize = 2;

    fn schema(&self) -> Schema {
        let privilege = Block::new()
            .with_attribute(
                "db",
                Attribute::optional_string()
                    .with_default(json!(""))
                    .with_description("Database of the resource, empty for all databases"),
            )
            .with_attribute(
                "collection",
                Attribute::optional_string()
                    .with_default(json!(""))
                    .with_description("Collection of the resource, empty for all collections"),
            )
            .with_attribute(
                "actions",
                Attribute::new(
                    AttributeType::list(AttributeType::String),
                    AttributeFlags::optional(),
                )
                .with_default(json!([]))
                .with_description("Granted actions"),
            );

        Schema::new(1)
            .with_description("A MongoDB user-defined role")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "database",
                Attribute::optional_string()
                    .with_default(json!(DEFAULT_DATABASE))
                    .with_force_new()
                    .with_description("Database the role is defined in"),
            )
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Role name"),
            )
            .with_block(
                "inherited_role",
                NestedBlock::set(role_ref_block()).with_max_items(MAX_ITEMS),
            )
            .with_block(
                "privilege",
                NestedBlock::set(privilege).with_max_items(MAX_ITEMS),
            )
    }

    #[instrument(skip_all, fields(db = %desired.database, role = %desired.name))]
    async fn create(
        &self,
        client: &dyn AdminClient,
        desired: RoleState,
    ) -> Result<RoleState, ProviderError> {
        let id = encode_pair(&desired.database, &desired.name)?;

        self.create_role(client, &desired)
            .await
            .map_err(|err| err.context(format!("could not create role {}", desired.name)))?;
        info!(
            privileges = desired.privilege.len(),
            inherited_roles = desired.inherited_role.len(),
            "Created role"
        );

        self.read(
            client,
            RoleState {
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
        current: RoleState,
    ) -> Result<RoleState, ProviderError> {
        let id = require_id(&current.id, Self::TYPE_NAME)?.to_string();
        let (db, name) = decode_pair(&id)?;

        let reply = client
            .run_command(
                &db,
                doc! {
                    "rolesInfo": { "role": name.as_str(), "db": db.as_str() },
                    "showPrivileges": true,
                },
            )
            .await?;
        let roles = reply
            .get_array("roles")
            .map_err(|err| ProviderError::Response(format!("rolesInfo reply has no roles: {}", err)))?;
        let Some(Bson::Document(role)) = roles.first() else {
            return Err(ProviderError::NotFound(format!(
                "role {} in database {}",
                name, db
            )));
        };

        let inherited_role = roles_from_reply(role, "roles")?;
        let privilege = match role.get_array("privileges") {
            Ok(entries) => entries
                .iter()
                .filter_map(Bson::as_document)
                .map(Privilege::from_document)
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => Vec::new(),
        };
        debug!(
            db = %db,
            role = %name,
            privileges = privilege.len(),
            inherited_roles = inherited_role.len(),
            "Read role"
        );

        Ok(RoleState {
            id: Some(id),
            database: db,
            name,
            inherited_role,
            privilege,
        })
    }

    #[instrument(skip_all)]
    async fn update(
        &self,
        client: &dyn AdminClient,
        prior: RoleState,
        planned: RoleState,
    ) -> Result<RoleState, ProviderError> {
        let id = require_id(&prior.id, Self::TYPE_NAME)?.to_string();
        let (db, name) = decode_pair(&id)?;

        client
            .run_command(&db, doc! { "dropRole": name.as_str() })
            .await
            .map_err(|err| err.context(format!("could not drop role {} for recreation", name)))?;

        let recreated = RoleState {
            id: Some(id),
            database: db,
            name,
            ..planned
        };
        if let Err(err) = self.create_role(client, &recreated).await {
            error!(
                db = %recreated.database,
                role = %recreated.name,
                error = %err,
                "Role was dropped but could not be recreated"
            );
            return Err(err.context(format!(
                "role {} in database {} was dropped and could not be recreated, it is now missing",
                recreated.name, recreated.database
            )));
        }
        info!(db = %recreated.database, role = %recreated.name, "Recreated role");

        self.read(client, recreated).await
    }

    #[instrument(skip_all)]
    async fn delete(&self, client: &dyn AdminClient, current: RoleState) -> Result<(), ProviderError> {
        let (db, name) = decode_pair(require_id(&current.id, Self::TYPE_NAME)?)?;

        client
            .run_command(&db, doc! { "dropRole": name.as_str() })
            .await
            .map_err(|err| err.context(format!("could not drop role {}", name)))?;
        info!(db = %db, role = %name, "Dropped role");
        Ok(())
    }

    fn import(&self, id: &str) -> Result<RoleState, ProviderError> {
        let (database, name) = decode_pair(id)?;
        Ok(RoleState {
            id: Some(id.to_string()),
            database,
            name,
            inherited_role: Vec::new(),
            privilege: Vec::new(),
        })
    }

    fn validate(&self, desired: &RoleState) -> Vec<Diagnostic> {
        let mut diagnostics = duplicate_roles(&desired.inherited_role, "inherited_role");
        for (i, privilege) in desired.privilege.iter().enumerate() {
            if privilege.actions.is_empty() {
                diagnostics.push(
                    Diagnostic::warning("Privilege grants no actions")
                        .with_attribute(format!("privilege.{}.actions", i)),
                );
            }
        }
        if desired.database.contains('.') {
            diagnostics.push(
                Diagnostic::error("database must not contain '.'")
                    .with_detail("The identifier joins the database and role name with '.'")
                    .with_attribute("database"),
            );
        }
        diagnostics
    }
}

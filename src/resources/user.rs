//! `mongodb_db_user`: database users.
//!
//! Users are updated in place with `updateUser`. The password is write-only:
//! the server never returns it, so Read keeps the value held in state.

use std::fmt;

use async_trait::async_trait;
use mongodb::bson::{doc, Bson};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{
    duplicate_roles, require_id, role_documents, role_ref_block, roles_from_reply, Reconciler,
    RoleRef,
};
use crate::client::AdminClient;
use crate::error::ProviderError;
use crate::id::{decode_pair, encode_pair};
use crate::schema::{Attribute, Diagnostic, NestedBlock, Schema};

/// Server error code for a user that does not exist.
pub const USER_NOT_FOUND: i32 = 11;

/// Maximum number of roles granted to one user.
pub const MAX_ROLES: u32 = 25;

/// State of a database user.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    /// Encoded `{auth_database, name}`.
    #[serde(default)]
    pub id: Option<String>,
    /// Database the user is defined in.
    pub auth_database: String,
    /// User name.
    pub name: String,
    /// Password, never read back.
    #[serde(default)]
    pub password: String,
    /// Granted roles.
    #[serde(default)]
    pub role: Vec<RoleRef>,
}

impl fmt::Debug for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserState")
            .field("id", &self.id)
            .field("auth_database", &self.auth_database)
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

/// Reconciler for database users.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserResource;

#[async_trait]
impl Reconciler for UserResource {
    type State = UserState;

    const TYPE_NAME: &'static str = "mongodb_db_user";
    const ID_SEGMENTS: usize = 2;

    fn schema(&self) -> Schema {
        Schema::new(1)
            .with_description("A MongoDB database user")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "auth_database",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Database the user is defined in"),
            )
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("User name"),
            )
            .with_attribute(
                "password",
                Attribute::required_string()
                    .sensitive()
                    .with_description("User password"),
            )
            .with_block(
                "role",
                NestedBlock::set(role_ref_block()).with_max_items(MAX_ROLES),
            )
    }

    #[instrument(skip_all, fields(db = %desired.auth_database, user = %desired.name))]
    async fn create(
        &self,
        client: &dyn AdminClient,
        desired: UserState,
    ) -> Result<UserState, ProviderError> {
        let id = encode_pair(&desired.auth_database, &desired.name)?;

        let command = doc! {
            "createUser": desired.name.as_str(),
            "pwd": desired.password.as_str(),
            "roles": role_documents(&desired.role),
        };
        client
            .run_command(&desired.auth_database, command)
            .await
            .map_err(|err| err.context(format!("could not create user {}", desired.name)))?;
        info!(roles = desired.role.len(), "Created user");

        self.read(
            client,
            UserState {
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
        current: UserState,
    ) -> Result<UserState, ProviderError> {
        let id = require_id(&current.id, Self::TYPE_NAME)?.to_string();
        let (db, name) = decode_pair(&id)?;

        let reply = client
            .run_command(
                &db,
                doc! { "usersInfo": { "user": name.as_str(), "db": db.as_str() } },
            )
            .await?;
        let users = reply
            .get_array("users")
            .map_err(|err| ProviderError::Response(format!("usersInfo reply has no users: {}", err)))?;
        let Some(Bson::Document(user)) = users.first() else {
            return Err(ProviderError::NotFound(format!(
                "user {} in database {}",
                name, db
            )));
        };

        let role = roles_from_reply(user, "roles")?;
        debug!(db = %db, user = %name, roles = role.len(), "Read user");

        Ok(UserState {
            id: Some(id),
            auth_database: db,
            name,
            password: current.password,
            role,
        })
    }

    #[instrument(skip_all)]
    async fn update(
        &self,
        client: &dyn AdminClient,
        prior: UserState,
        planned: UserState,
    ) -> Result<UserState, ProviderError> {
        let id = require_id(&prior.id, Self::TYPE_NAME)?.to_string();
        let (db, name) = decode_pair(&id)?;

        let command = doc! {
            "updateUser": name.as_str(),
            "pwd": planned.password.as_str(),
            "roles": role_documents(&planned.role),
        };
        client
            .run_command(&db, command)
            .await
            .map_err(|err| err.context(format!("could not update user {}", name)))?;
        info!(db = %db, user = %name, "Updated user");

        self.read(
            client,
            UserState {
                id: Some(id),
                ..planned
            },
        )
        .await
    }

    #[instrument(skip_all)]
    async fn delete(&self, client: &dyn AdminClient, current: UserState) -> Result<(), ProviderError> {
        let (db, name) = decode_pair(require_id(&current.id, Self::TYPE_NAME)?)?;

        match client.run_command(&db, doc! { "dropUser": name.as_str() }).await {
            Ok(_) => {
                info!(db = %db, user = %name, "Dropped user");
                Ok(())
            },
            Err(err) if err.is_command_code(USER_NOT_FOUND) => {
                warn!(db = %db, user = %name, "User already gone");
                Ok(())
            },
            Err(err) => Err(err.context(format!("could not drop user {}", name))),
        }
    }

    fn import(&self, id: &str) -> Result<UserState, ProviderError> {
        let (auth_database, name) = decode_pair(id)?;
        Ok(UserState {
            id: Some(id.to_string()),
            auth_database,
            name,
            password: String::new(),
            role: Vec::new(),
        })
    }

    fn validate(&self, desired: &UserState) -> Vec<Diagnostic> {
        let mut diagnostics = duplicate_roles(&desired.role, "role");
        if desired.auth_database.contains('.') {
            diagnostics.push(
                Diagnostic::error("auth_database must not contain '.'")
                    .with_detail("The identifier joins the database and user name with '.'")
                    .with_attribute("auth_database"),
            );
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAdminServer;

    fn alice(roles: Vec<RoleRef>) -> UserState {
        UserState {
            id: None,
            auth_database: "admin".to_string(),
            name: "alice".to_string(),
            password: "pw".to_string(),
            role: roles,
        }
    }

    #[tokio::test]
    async fn test_create_without_roles() {
        let server = FakeAdminServer::new();
        let state = UserResource.create(&server, alice(vec![])).await.unwrap();

        assert_eq!(state.id.as_deref(), Some("YWRtaW4uYWxpY2U="));
        assert!(state.role.is_empty());
        assert_eq!(state.password, "pw");

        let commands = server.commands();
        assert_eq!(commands[0].name, "createUser");
        assert_eq!(commands[0].db, "admin");
        assert!(commands[0].body.get_array("roles").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_with_roles_reads_them_back() {
        let server = FakeAdminServer::new();
        let roles = vec![RoleRef::new("readWrite", "shop"), RoleRef::new("read", "reporting")];
        let state = UserResource.create(&server, alice(roles.clone())).await.unwrap();

        assert_eq!(state.role, roles);
        assert_eq!(server.count("usersInfo"), 1);
    }

    #[tokio::test]
    async fn test_create_conflict_keeps_server_code() {
        let server = FakeAdminServer::new();
        UserResource.create(&server, alice(vec![])).await.unwrap();

        let err = UserResource.create(&server, alice(vec![])).await.unwrap_err();
        assert!(err.is_command_code(51003));
        assert!(err.message().contains("could not create user alice"));
    }

    #[tokio::test]
    async fn test_read_missing_user_is_not_found() {
        let server = FakeAdminServer::new();
        let state = UserResource.import("YWRtaW4uYWxpY2U=").unwrap();

        let err = UserResource.read(&server, state).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_rejects_malformed_id() {
        let server = FakeAdminServer::new();
        let mut state = alice(vec![]);
        state.id = Some("not-an-id!".to_string());

        let err = UserResource.read(&server, state).await.unwrap_err();
        assert!(matches!(err, ProviderError::Format(_)));
        assert!(server.commands().is_empty());
    }

    #[tokio::test]
    async fn test_update_in_place() {
        let server = FakeAdminServer::new();
        let created = UserResource.create(&server, alice(vec![])).await.unwrap();

        let mut planned = created.clone();
        planned.password = "new-pw".to_string();
        planned.role = vec![RoleRef::new("read", "shop")];

        let updated = UserResource
            .update(&server, created.clone(), planned)
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.role, vec![RoleRef::new("read", "shop")]);
        assert_eq!(updated.password, "new-pw");
        assert_eq!(server.count("dropUser"), 0);
        assert_eq!(
            server.user("admin", "alice").unwrap().password.as_deref(),
            Some("new-pw")
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let server = FakeAdminServer::new();
        let created = UserResource.create(&server, alice(vec![])).await.unwrap();

        UserResource.delete(&server, created.clone()).await.unwrap();
        assert!(server.user("admin", "alice").is_none());

        // A second delete hits UserNotFound and still succeeds.
        UserResource.delete(&server, created).await.unwrap();
        assert_eq!(server.count("dropUser"), 2);
    }

    #[tokio::test]
    async fn test_delete_surfaces_other_errors() {
        let server = FakeAdminServer::new();
        let created = UserResource.create(&server, alice(vec![])).await.unwrap();
        server.fail_next("dropUser", 13, "not authorized on admin");

        let err = UserResource.delete(&server, created).await.unwrap_err();
        assert!(err.is_command_code(13));
    }

    #[test]
    fn test_import_decodes_identity() {
        let state = UserResource.import("YWRtaW4uYWxpY2U=").unwrap();
        assert_eq!(state.auth_database, "admin");
        assert_eq!(state.name, "alice");
        assert!(UserResource.import("bm9kb3Q=").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let debug = format!("{:?}", alice(vec![]));
        assert!(!debug.contains("\"pw\""));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_validate_duplicate_roles() {
        let state = alice(vec![RoleRef::new("read", "shop"), RoleRef::new("read", "shop")]);
        assert_eq!(UserResource.validate(&state).len(), 1);
    }
}

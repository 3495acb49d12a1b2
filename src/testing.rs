//! Testing utilities for the provider.
//!
//! [`FakeAdminServer`] answers administrative commands from memory and
//! records every command it receives, so reconcilers can be exercised
//! without a database. [`StaticConnector`] hands it to a provider, and
//! [`ProviderTester`] drives a [`ProviderService`] without a gRPC server.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hemmer_provider_mongodb::testing::{FakeAdminServer, ProviderTester, StaticConnector};
//! use hemmer_provider_mongodb::MongoProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_collection() {
//!     let server = Arc::new(FakeAdminServer::new());
//!     let provider = MongoProvider::with_connector(StaticConnector::new(server.clone()));
//!     let tester = ProviderTester::new(provider);
//!     tester.configure(json!({})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("mongodb_db_collection", json!({"db": "shop", "name": "orders"}))
//!         .await
//!         .unwrap();
//!     assert!(server.has_collection("shop", "orders"));
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use serde_json::Value;

use crate::client::{AdminClient, Connector};
use crate::config::ClientConfig;
use crate::error::ProviderError;
use crate::plan::PlanResult;
use crate::schema::Diagnostic;
use crate::server::ProviderService;

/// Server error codes the fake answers with.
pub mod codes {
    /// `UserNotFound`
    pub const USER_NOT_FOUND: i32 = 11;
    /// `NamespaceNotFound`
    pub const NAMESPACE_NOT_FOUND: i32 = 26;
    /// `IndexNotFound`
    pub const INDEX_NOT_FOUND: i32 = 27;
    /// `RoleNotFound`
    pub const ROLE_NOT_FOUND: i32 = 31;
    /// `NamespaceExists`
    pub const NAMESPACE_EXISTS: i32 = 48;
    /// `CommandNotFound`
    pub const COMMAND_NOT_FOUND: i32 = 59;
    /// `IndexKeySpecsConflict`
    pub const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
    /// Role already exists.
    pub const ROLE_EXISTS: i32 = 51002;
    /// User already exists.
    pub const USER_EXISTS: i32 = 51003;
}

/// A command received by [`FakeAdminServer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    /// Database the command ran against.
    pub db: String,
    /// Command name, the first key of the document.
    pub name: String,
    /// The full command document.
    pub body: Document,
}

/// A user held by [`FakeAdminServer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeUser {
    /// Password from the last `createUser` or `updateUser`.
    pub password: Option<String>,
    /// Granted roles as sent.
    pub roles: Vec<Document>,
}

/// A role held by [`FakeAdminServer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeRole {
    /// Privileges as sent.
    pub privileges: Vec<Document>,
    /// Inherited roles as sent.
    pub roles: Vec<Document>,
}

type Namespace = (String, String);

#[derive(Debug, Default)]
struct Inner {
    commands: Vec<RecordedCommand>,
    failures: Vec<(String, i32, String)>,
    users: BTreeMap<Namespace, FakeUser>,
    roles: BTreeMap<Namespace, FakeRole>,
    /// Index specifications per collection, in creation order.
    collections: BTreeMap<Namespace, Vec<Document>>,
}

/// In-memory stand-in for a MongoDB server's administrative commands.
#[derive(Debug, Default)]
pub struct FakeAdminServer {
    inner: Mutex<Inner>,
}

fn ns(db: &str, name: &str) -> Namespace {
    (db.to_string(), name.to_string())
}

fn documents(command: &Document, key: &str) -> Vec<Document> {
    command
        .get_array(key)
        .map(|items| items.iter().filter_map(Bson::as_document).cloned().collect())
        .unwrap_or_default()
}

/// The index as the server describes it: text fields collapse into
/// `_fts`/`_ftsx` and are listed in `weights`.
fn stored_index(mut index: Document) -> Document {
    let Ok(key) = index.get_document("key").cloned() else {
        return index;
    };
    let mut stored = Document::new();
    let mut weights = BTreeMap::new();
    for (field, value) in key {
        if value.as_str() == Some("text") {
            if weights.is_empty() {
                stored.insert("_fts", "text");
                stored.insert("_ftsx", 1);
            }
            weights.insert(field, Bson::Int32(1));
        } else {
            stored.insert(field, value);
        }
    }
    if weights.is_empty() {
        return index;
    }

    index.insert("key", stored);
    index.insert("weights", weights.into_iter().collect::<Document>());
    index.insert("default_language", "english");
    index.insert("language_override", "language");
    index.insert("textIndexVersion", 3);
    index
}

fn cursor(db: &str, collection: &str, batch: Vec<Document>) -> Document {
    doc! {
        "cursor": { "id": 0_i64, "ns": format!("{}.{}", db, collection), "firstBatch": batch },
        "ok": 1,
    }
}

fn id_index() -> Document {
    doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }
}

impl FakeAdminServer {
    /// An empty server.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.lock().commands.clone()
    }

    /// How many times `name` was received.
    pub fn count(&self, name: &str) -> usize {
        self.lock().commands.iter().filter(|c| c.name == name).count()
    }

    /// Fail the next `command` with the given server error.
    pub fn fail_next(&self, command: &str, code: i32, message: &str) {
        self.lock()
            .failures
            .push((command.to_string(), code, message.to_string()));
    }

    /// The user `name` in `db`.
    pub fn user(&self, db: &str, name: &str) -> Option<FakeUser> {
        self.lock().users.get(&ns(db, name)).cloned()
    }

    /// The role `name` in `db`.
    pub fn role(&self, db: &str, name: &str) -> Option<FakeRole> {
        self.lock().roles.get(&ns(db, name)).cloned()
    }

    /// Seed a user without recording a command.
    pub fn add_user(&self, db: &str, name: &str, password: &str, roles: Vec<Document>) {
        self.lock().users.insert(
            ns(db, name),
            FakeUser {
                password: Some(password.to_string()),
                roles,
            },
        );
    }

    /// Seed a collection without recording a command.
    pub fn add_collection(&self, db: &str, name: &str) {
        self.lock()
            .collections
            .entry(ns(db, name))
            .or_insert_with(|| vec![id_index()]);
    }

    /// Whether the collection exists.
    pub fn has_collection(&self, db: &str, name: &str) -> bool {
        self.lock().collections.contains_key(&ns(db, name))
    }

    /// Index names of a collection, in creation order.
    pub fn index_names(&self, db: &str, collection: &str) -> Vec<String> {
        self.lock()
            .collections
            .get(&ns(db, collection))
            .map(|indexes| {
                indexes
                    .iter()
                    .filter_map(|index| index.get_str("name").ok())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn execute(inner: &mut Inner, db: &str, name: &str, command: &Document) -> Result<Document, ProviderError> {
        let target = command.get_str(name).unwrap_or_default().to_string();
        let ok = doc! { "ok": 1 };

        match name {
            "ping" => Ok(ok),
            "createUser" => {
                if inner.users.contains_key(&ns(db, &target)) {
                    return Err(ProviderError::command(
                        codes::USER_EXISTS,
                        format!("User \"{}@{}\" already exists", target, db),
                    ));
                }
                let user = FakeUser {
                    password: command.get_str("pwd").ok().map(str::to_string),
                    roles: documents(command, "roles"),
                };
                inner.users.insert(ns(db, &target), user);
                Ok(ok)
            },
            "updateUser" => {
                let user = inner.users.get_mut(&ns(db, &target)).ok_or_else(|| {
                    ProviderError::command(codes::USER_NOT_FOUND, format!("User {}@{} not found", target, db))
                })?;
                if let Ok(pwd) = command.get_str("pwd") {
                    user.password = Some(pwd.to_string());
                }
                if command.contains_key("roles") {
                    user.roles = documents(command, "roles");
                }
                Ok(ok)
            },
            "dropUser" => {
                inner.users.remove(&ns(db, &target)).ok_or_else(|| {
                    ProviderError::command(codes::USER_NOT_FOUND, format!("User {}@{} not found", target, db))
                })?;
                Ok(ok)
            },
            "usersInfo" => {
                let filter = command.get_document(name).ok();
                let user_db = filter.and_then(|f| f.get_str("db").ok()).unwrap_or(db);
                let user_name = filter.and_then(|f| f.get_str("user").ok()).unwrap_or_default();
                let users: Vec<Document> = inner
                    .users
                    .get(&ns(user_db, user_name))
                    .map(|user| {
                        doc! {
                            "_id": format!("{}.{}", user_db, user_name),
                            "user": user_name,
                            "db": user_db,
                            "roles": user.roles.clone(),
                        }
                    })
                    .into_iter()
                    .collect();
                Ok(doc! { "users": users, "ok": 1 })
            },
            "createRole" => {
                if inner.roles.contains_key(&ns(db, &target)) {
                    return Err(ProviderError::command(
                        codes::ROLE_EXISTS,
                        format!("Role \"{}@{}\" already exists", target, db),
                    ));
                }
                let role = FakeRole {
                    privileges: documents(command, "privileges"),
                    roles: documents(command, "roles"),
                };
                inner.roles.insert(ns(db, &target), role);
                Ok(ok)
            },
            "dropRole" => {
                inner.roles.remove(&ns(db, &target)).ok_or_else(|| {
                    ProviderError::command(codes::ROLE_NOT_FOUND, format!("Role {}@{} not found", target, db))
                })?;
                Ok(ok)
            },
            "rolesInfo" => {
                let filter = command.get_document(name).ok();
                let role_db = filter.and_then(|f| f.get_str("db").ok()).unwrap_or(db);
                let role_name = filter.and_then(|f| f.get_str("role").ok()).unwrap_or_default();
                let roles: Vec<Document> = inner
                    .roles
                    .get(&ns(role_db, role_name))
                    .map(|role| {
                        doc! {
                            "role": role_name,
                            "db": role_db,
                            "isBuiltin": false,
                            "roles": role.roles.clone(),
                            "inheritedRoles": role.roles.clone(),
                            "privileges": role.privileges.clone(),
                        }
                    })
                    .into_iter()
                    .collect();
                Ok(doc! { "roles": roles, "ok": 1 })
            },
            "create" => {
                if inner.collections.contains_key(&ns(db, &target)) {
                    return Err(ProviderError::command(
                        codes::NAMESPACE_EXISTS,
                        format!("Collection {}.{} already exists.", db, target),
                    ));
                }
                inner.collections.insert(ns(db, &target), vec![id_index()]);
                Ok(ok)
            },
            "drop" => {
                inner
                    .collections
                    .remove(&ns(db, &target))
                    .ok_or_else(|| ProviderError::command(codes::NAMESPACE_NOT_FOUND, "ns not found"))?;
                Ok(ok)
            },
            "listCollections" => {
                let wanted = command
                    .get_document("filter")
                    .ok()
                    .and_then(|filter| filter.get_str("name").ok());
                let batch = inner
                    .collections
                    .keys()
                    .filter(|(collection_db, collection)| {
                        collection_db == db && wanted.map_or(true, |wanted| wanted == collection.as_str())
                    })
                    .map(|(_, collection)| doc! { "name": collection.as_str(), "type": "collection" })
                    .collect();
                Ok(cursor(db, "$cmd.listCollections", batch))
            },
            "createIndexes" => {
                let indexes = inner
                    .collections
                    .entry(ns(db, &target))
                    .or_insert_with(|| vec![id_index()]);
                for index in documents(command, "indexes").into_iter().map(stored_index) {
                    let index_name = index.get_str("name").unwrap_or_default().to_string();
                    let same_key = indexes
                        .iter()
                        .find(|i| i.get_str("name").is_ok_and(|n| n == index_name))
                        .map(|existing| existing.get("key") == index.get("key"));
                    match same_key {
                        Some(true) => {},
                        Some(false) => {
                            return Err(ProviderError::command(
                                codes::INDEX_KEY_SPECS_CONFLICT,
                                format!("An existing index has the same name as the requested index: {}", index_name),
                            ))
                        },
                        None => indexes.push(index),
                    }
                }
                Ok(ok)
            },
            "listIndexes" => {
                let indexes = inner.collections.get(&ns(db, &target)).ok_or_else(|| {
                    ProviderError::command(codes::NAMESPACE_NOT_FOUND, format!("ns does not exist: {}.{}", db, target))
                })?;
                Ok(cursor(db, &target, indexes.clone()))
            },
            "dropIndexes" => {
                let index_name = command.get_str("index").unwrap_or_default();
                let indexes = inner.collections.get_mut(&ns(db, &target)).ok_or_else(|| {
                    ProviderError::command(codes::NAMESPACE_NOT_FOUND, format!("ns not found {}.{}", db, target))
                })?;
                let position = indexes
                    .iter()
                    .position(|i| i.get_str("name").is_ok_and(|n| n == index_name))
                    .ok_or_else(|| {
                        ProviderError::command(
                            codes::INDEX_NOT_FOUND,
                            format!("index not found with name [{}]", index_name),
                        )
                    })?;
                indexes.remove(position);
                Ok(ok)
            },
            other => Err(ProviderError::command(
                codes::COMMAND_NOT_FOUND,
                format!("no such command: '{}'", other),
            )),
        }
    }
}

#[async_trait]
impl AdminClient for FakeAdminServer {
    async fn run_command(&self, db: &str, command: Document) -> Result<Document, ProviderError> {
        let name = command.keys().next().cloned().unwrap_or_default();
        let mut inner = self.lock();
        inner.commands.push(RecordedCommand {
            db: db.to_string(),
            name: name.clone(),
            body: command.clone(),
        });

        if let Some(position) = inner.failures.iter().position(|(failing, _, _)| *failing == name) {
            let (_, code, message) = inner.failures.remove(position);
            return Err(ProviderError::command(code, message));
        }

        Self::execute(&mut inner, db, &name, &command)
    }
}

/// [`Connector`] that always hands out the same [`FakeAdminServer`].
#[derive(Debug)]
pub struct StaticConnector {
    server: Option<Arc<FakeAdminServer>>,
    connections: AtomicUsize,
    last_config: Mutex<Option<ClientConfig>>,
}

impl StaticConnector {
    /// Connect every operation to `server`.
    pub fn new(server: Arc<FakeAdminServer>) -> Self {
        Self {
            server: Some(server),
            connections: AtomicUsize::new(0),
            last_config: Mutex::new(None),
        }
    }

    /// A connector whose server can never be reached.
    pub fn unreachable() -> Self {
        Self {
            server: None,
            connections: AtomicUsize::new(0),
            last_config: Mutex::new(None),
        }
    }

    /// Number of connection attempts.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Configuration of the latest connection attempt.
    pub fn last_config(&self) -> Option<ClientConfig> {
        self.last_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn AdminClient>, ProviderError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());

        match &self.server {
            Some(server) => Ok(server.clone()),
            None => Err(ProviderError::Connection(format!(
                "Error connecting to database {}:{}: server unreachable",
                config.host, config.port
            ))),
        }
    }
}

/// Drives a [`ProviderService`] through the host's call sequences without a
/// gRPC server.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider, for calls the tester has no shortcut for.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// `Configure`, failing on error diagnostics.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        errors_only(self.provider.configure(config).await?)
    }

    /// `ValidateResourceConfig`, failing on error diagnostics.
    pub async fn validate_resource_config(&self, resource_type: &str, config: Value) -> Result<(), TestError> {
        errors_only(self.provider.validate_resource_config(resource_type, config).await?)
    }

    /// Plan a resource that does not exist yet.
    pub async fn plan_create(&self, resource_type: &str, config: Value) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, config.clone(), config).await
    }

    /// Plan `config` against `prior`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior), config.clone(), config)
            .await
    }

    /// Plan removing `prior`.
    pub async fn plan_delete(&self, resource_type: &str, prior: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior), Value::Null, Value::Null)
            .await
    }

    /// Plan, create and refresh. Returns the refreshed state.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Value) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.provider.create(resource_type, plan.planned_state).await?;
        self.provider.read(resource_type, created).await
    }

    /// Plan, then replace or update in place as the plan says, and refresh.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_update(resource_type, prior.clone(), config).await?;
        let applied = if plan.requires_replace {
            self.provider.delete(resource_type, prior).await?;
            self.provider.create(resource_type, plan.planned_state).await?
        } else {
            self.provider.update(resource_type, prior, plan.planned_state).await?
        };
        self.provider.read(resource_type, applied).await
    }

    /// Plan a destroy, then delete.
    pub async fn lifecycle_delete(&self, resource_type: &str, current: Value) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current.clone()).await?;
        self.provider.delete(resource_type, current).await
    }

    /// Create from `initial`, move to `updated`, then delete. Returns the
    /// state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial: Value,
        updated: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial).await?;
        let state = self.lifecycle_update(resource_type, created, updated).await?;
        self.lifecycle_delete(resource_type, state.clone()).await?;
        Ok(state)
    }
}

/// Failure of a [`ProviderTester`] call.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// The provider answered with error diagnostics.
    #[error("{}", render_diagnostics(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The provider returned an error.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let lines: Vec<String> = diagnostics
        .iter()
        .map(|d| {
            let mut line = d.summary.clone();
            if let Some(detail) = &d.detail {
                line = format!("{}: {}", line, detail);
            }
            if let Some(attribute) = &d.attribute {
                line = format!("{} (at {})", line, attribute);
            }
            line
        })
        .collect();
    format!("{} error diagnostic(s): {}", diagnostics.len(), lines.join("; "))
}

fn errors_only(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<Diagnostic> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|change| change.path.as_str()).collect()
}

/// Panics unless `plan` adds attributes without replacing anything.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "create plan has no changes");
    assert!(!plan.requires_replace, "create plan asks for replacement");
}

/// Panics if `plan` changes anything.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "plan should be empty, it changes {:?}",
        changed_paths(plan)
    );
}

/// Panics unless `plan` replaces the resource.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "plan should replace the resource, it changes {:?} in place",
        changed_paths(plan)
    );
}

/// Panics if `plan` replaces the resource.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "plan should update in place, it replaces the resource over {:?}",
        changed_paths(plan)
    );
}

/// Panics unless `plan` changes `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let paths = changed_paths(plan);
    assert!(paths.contains(&path), "plan leaves '{}' alone, it changes {:?}", path, paths);
}

/// Panics if any of `diagnostics` is an error.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.summary.as_str())
        .collect();
    assert!(errors.is_empty(), "unexpected error diagnostics: {:?}", errors);
}

/// Panics unless an error diagnostic's summary contains `needle`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], needle: &str) {
    let errors: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.summary.as_str())
        .collect();
    assert!(
        errors.iter().any(|summary| summary.contains(needle)),
        "no error diagnostic mentions '{}': {:?}",
        needle,
        errors
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MongoProvider;
    use serde_json::json;

    fn tester() -> (Arc<FakeAdminServer>, ProviderTester<MongoProvider<StaticConnector>>) {
        let server = Arc::new(FakeAdminServer::new());
        let provider = MongoProvider::with_connector(StaticConnector::new(server.clone()))
            .with_env(|_| None);
        (server, ProviderTester::new(provider))
    }

    #[tokio::test]
    async fn test_fake_fails_next_command_once() {
        let server = FakeAdminServer::new();
        server.fail_next("ping", 13, "not authorized");

        let err = server.run_command("admin", doc! { "ping": 1 }).await.unwrap_err();
        assert!(err.is_command_code(13));
        server.run_command("admin", doc! { "ping": 1 }).await.unwrap();
        assert_eq!(server.count("ping"), 2);
    }

    #[tokio::test]
    async fn test_fake_rejects_unknown_command() {
        let server = FakeAdminServer::new();
        let err = server
            .run_command("admin", doc! { "shutdown": 1 })
            .await
            .unwrap_err();
        assert!(err.is_command_code(codes::COMMAND_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_fake_collection_helpers() {
        let server = FakeAdminServer::new();
        server.create_collection("shop", "orders").await.unwrap();

        let listed = server.list_collections("shop", None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(server.list_collections("other", None).await.unwrap().is_empty());
        assert_eq!(server.index_names("shop", "orders"), vec!["_id_"]);

        let err = server.create_collection("shop", "orders").await.unwrap_err();
        assert!(err.is_command_code(codes::NAMESPACE_EXISTS));
    }

    #[tokio::test]
    async fn test_fake_describes_text_index_like_server() {
        let server = FakeAdminServer::new();
        let name = server
            .create_index("shop", "posts", doc! { "key": { "title": "text", "body": "text", "year": -1 } }, None)
            .await
            .unwrap();
        assert_eq!(name, "title_text_body_text_year_-1");

        let indexes = server.list_indexes("shop", "posts").await.unwrap();
        let text = &indexes[1];
        assert_eq!(text.get_document("key").unwrap(), &doc! { "_fts": "text", "_ftsx": 1, "year": -1 });
        assert_eq!(text.get_document("weights").unwrap(), &doc! { "body": 1, "title": 1 });

        // Same definition again is a no-op, as on a real server.
        server
            .create_index("shop", "posts", doc! { "key": { "title": "text", "body": "text", "year": -1 } }, None)
            .await
            .unwrap();
        assert_eq!(server.index_names("shop", "posts").len(), 2);
    }

    #[tokio::test]
    async fn test_fake_users_info_reflects_seeded_user() {
        let server = FakeAdminServer::new();
        server.add_user("admin", "bob", "pw", vec![doc! { "role": "read", "db": "shop" }]);

        let reply = server
            .run_command("admin", doc! { "usersInfo": { "user": "bob", "db": "admin" } })
            .await
            .unwrap();
        let users = reply.get_array("users").unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(server.user("admin", "bob").unwrap().password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_static_connector_unreachable() {
        let connector = StaticConnector::unreachable();
        let result = tokio_test::block_on(connector.connect(&ClientConfig::default()));

        assert!(matches!(result, Err(ProviderError::Connection(_))));
        assert_eq!(connector.connections(), 1);
        assert_eq!(connector.last_config().unwrap().port, 27017);
    }

    #[tokio::test]
    async fn test_tester_configure_reports_diagnostics() {
        let (_, tester) = tester();
        let err = tester
            .configure(json!({"missing_resource_policy": {"mongodb_db_user": "ignore"}}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing_resource_policy.mongodb_db_user"));
    }

    #[tokio::test]
    async fn test_tester_lifecycle_crud_user() {
        let (server, tester) = tester();
        tester.configure(json!({})).await.unwrap();

        let updated = tester
            .lifecycle_crud(
                "mongodb_db_user",
                json!({"auth_database": "admin", "name": "alice", "password": "pw"}),
                json!({
                    "auth_database": "admin",
                    "name": "alice",
                    "password": "pw",
                    "role": [{"role": "read", "db": "shop"}]
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated["role"], json!([{"role": "read", "db": "shop"}]));
        assert!(server.user("admin", "alice").is_none());
        assert_eq!(server.count("updateUser"), 1);
    }

    #[tokio::test]
    async fn test_tester_plan_helpers() {
        let (_, tester) = tester();
        tester.configure(json!({})).await.unwrap();

        let plan = tester
            .plan_create("mongodb_db_collection", json!({"db": "shop", "name": "orders"}))
            .await
            .unwrap();
        assert_plan_creates(&plan);
        assert_plan_changes_attribute(&plan, "deletion_protection");

        let state = tester
            .provider()
            .create("mongodb_db_collection", plan.planned_state)
            .await
            .unwrap();
        let plan = tester
            .plan_update(
                "mongodb_db_collection",
                state.clone(),
                json!({"db": "shop", "name": "orders"}),
            )
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let plan = tester
            .plan_update(
                "mongodb_db_collection",
                state,
                json!({"db": "shop", "name": "invoices"}),
            )
            .await
            .unwrap();
        assert_plan_replaces(&plan);
    }

    #[tokio::test]
    async fn test_tester_validate_reports_diagnostics() {
        let (_, tester) = tester();
        let err = tester
            .validate_resource_config("mongodb_db_user", json!({"name": "alice"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Diagnostics(_)));
        assert!(err.to_string().contains("auth_database"));
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "unexpected error diagnostics")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Duplicate role read in database shop")];
        assert_error_contains(&diagnostics, "Duplicate role");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("keys"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("(at keys)"));
        assert!(display.contains("More info"));
    }
}

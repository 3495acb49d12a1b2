//! `mongodb_db_index`: secondary indexes.
//!
//! Keys and options are force-new, so the host normally replaces the
//! resource when they change. A rename reaches Update, which drops the prior
//! index and creates the new one; the two steps are not atomic.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{require_id, Reconciler};
use crate::client::AdminClient;
use crate::error::ProviderError;
use crate::id::{decode_triple, encode_triple};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};

/// Server error code for a database or collection that does not exist.
pub const NAMESPACE_NOT_FOUND: i32 = 26;

const DEFAULT_BITS: i64 = 26;
const DEFAULT_MIN: f64 = -180.0;
const DEFAULT_MAX: f64 = 180.0;
const DEFAULT_TIMEOUT_SECS: i64 = 30;

/// Geohash precision accepted by `2d` indexes.
const BITS_RANGE: std::ops::RangeInclusive<i64> = 1..=32;
/// Longest build time whose milliseconds still fit `maxTimeMS`.
const MAX_TIMEOUT_SECS: i64 = i64::MAX / 1000;

const TEXT: &str = "text";
/// Key entries standing in for the fields of a text index.
const TEXT_KEY: &str = "_fts";
const TEXT_POSITION_KEY: &str = "_ftsx";

fn default_bits() -> i64 {
    DEFAULT_BITS
}

fn default_min() -> f64 {
    DEFAULT_MIN
}

fn default_max() -> f64 {
    DEFAULT_MAX
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

/// The value of one index key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IndexKeyValue {
    /// `1`
    Ascending,
    /// `-1`
    Descending,
    /// `true` or `false`
    Boolean(bool),
    /// Any other index type, such as `text`, `2dsphere`, `hashed` or `2d`.
    Literal(String),
}

impl IndexKeyValue {
    /// Parse the declarative string form. Never fails.
    pub fn parse(value: &str) -> Self {
        match value {
            "1" => Self::Ascending,
            "-1" => Self::Descending,
            "true" => Self::Boolean(true),
            "false" => Self::Boolean(false),
            other => Self::Literal(other.to_string()),
        }
    }

    /// The value as it appears in a key document.
    pub fn to_bson(&self) -> Bson {
        match self {
            Self::Ascending => Bson::Int32(1),
            Self::Descending => Bson::Int32(-1),
            Self::Boolean(value) => Bson::Boolean(*value),
            Self::Literal(value) => Bson::String(value.clone()),
        }
    }

    /// Map a key document value back to its declarative form.
    pub fn from_bson(value: &Bson) -> Self {
        match value {
            Bson::Int32(n) => Self::from_number(f64::from(*n)),
            Bson::Int64(n) => Self::from_number(*n as f64),
            Bson::Double(n) => Self::from_number(*n),
            Bson::Boolean(b) => Self::Boolean(*b),
            Bson::String(s) => Self::Literal(s.clone()),
            other => Self::Literal(other.to_string()),
        }
    }

    fn from_number(n: f64) -> Self {
        if n == 1.0 {
            Self::Ascending
        } else if n == -1.0 {
            Self::Descending
        } else if n.fract() == 0.0 {
            Self::Literal(format!("{}", n as i64))
        } else {
            Self::Literal(n.to_string())
        }
    }

    fn is_geo_2d(&self) -> bool {
        matches!(self, Self::Literal(value) if value == "2d")
    }

    fn is_text(&self) -> bool {
        matches!(self, Self::Literal(value) if value == TEXT)
    }
}

impl FromStr for IndexKeyValue {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for IndexKeyValue {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<IndexKeyValue> for String {
    fn from(value: IndexKeyValue) -> Self {
        value.to_string()
    }
}

impl fmt::Display for IndexKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "1"),
            Self::Descending => write!(f, "-1"),
            Self::Boolean(value) => write!(f, "{}", value),
            Self::Literal(value) => write!(f, "{}", value),
        }
    }
}

/// One field of an index key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexKey {
    /// Indexed field.
    pub field: String,
    /// Direction or index type.
    pub value: IndexKeyValue,
}

impl IndexKey {
    /// Create an index key.
    pub fn new(field: impl Into<String>, value: IndexKeyValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

/// State of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    /// Encoded `{db, collection, name}`.
    #[serde(default)]
    pub id: Option<String>,
    /// Database holding the collection.
    pub db: String,
    /// Indexed collection.
    pub collection: String,
    /// Index name; the server default is used when unset.
    #[serde(default)]
    pub name: Option<String>,
    /// Ordered key fields.
    #[serde(default)]
    pub keys: Vec<IndexKey>,
    /// Reject duplicate key values.
    #[serde(default)]
    pub unique: bool,
    /// Skip documents missing the indexed fields.
    #[serde(default)]
    pub sparse: bool,
    /// Geohash precision of a `2d` index.
    #[serde(default = "default_bits")]
    pub bits: i64,
    /// Lower bound of a `2d` index.
    #[serde(default = "default_min")]
    pub min: f64,
    /// Upper bound of a `2d` index.
    #[serde(default = "default_max")]
    pub max: f64,
    /// Seconds allowed for the build. Never sent to the server as an option.
    #[serde(default = "default_timeout")]
    pub timeout: i64,
}

impl IndexState {
    /// The requested name, if any.
    fn requested_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    fn key_document(&self) -> Document {
        self.keys
            .iter()
            .map(|key| (key.field.clone(), key.value.to_bson()))
            .collect()
    }

    /// The `createIndexes` entry for this index, without its name.
    pub fn index_document(&self) -> Document {
        let mut index = Document::new();
        index.insert("key", self.key_document());
        index.insert("unique", self.unique);
        index.insert("sparse", self.sparse);
        if self.keys.iter().any(|key| key.value.is_geo_2d()) {
            index.insert("bits", self.bits);
            index.insert("min", self.min);
            index.insert("max", self.max);
        }
        index
    }
}

/// Map a `listIndexes` entry back to declarative keys.
///
/// The server stores the fields of a text index as `_fts`/`_ftsx` and lists
/// them in `weights`. They are expanded in place, in the order `known` gives
/// them; fields `known` does not mention follow in `weights` order.
fn read_keys(index: &Document, known: &[IndexKey]) -> Option<Vec<IndexKey>> {
    let key = index.get_document("key").ok()?;
    let mut keys = Vec::with_capacity(key.len());
    for (field, value) in key {
        match field.as_str() {
            TEXT_KEY => keys.extend(text_keys(index, known)?),
            TEXT_POSITION_KEY => {},
            _ => keys.push(IndexKey::new(field.clone(), IndexKeyValue::from_bson(value))),
        }
    }
    Some(keys)
}

fn text_keys(index: &Document, known: &[IndexKey]) -> Option<Vec<IndexKey>> {
    let weights = index.get_document("weights").ok()?;
    let order: Vec<&str> = known
        .iter()
        .filter(|key| key.value.is_text())
        .map(|key| key.field.as_str())
        .collect();

    let mut fields: Vec<&String> = weights.keys().collect();
    fields.sort_by_key(|field| order.iter().position(|name| name == field).unwrap_or(usize::MAX));
    Some(
        fields
            .into_iter()
            .map(|field| IndexKey::new(field.clone(), IndexKeyValue::Literal(TEXT.to_string())))
            .collect(),
    )
}

/// Reconciler for indexes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexResource;

impl IndexResource {
    async fn build(
        &self,
        client: &dyn AdminClient,
        db: &str,
        collection: &str,
        desired: &IndexState,
    ) -> Result<String, ProviderError> {
        let mut index = desired.index_document();
        if let Some(name) = desired.requested_name() {
            index.insert("name", name);
        }
        let seconds = u64::try_from(desired.timeout).map_err(|_| {
            ProviderError::InvalidRequest(format!("index build timeout {} is negative", desired.timeout))
        })?;
        let max_time = Duration::from_secs(seconds);
        client.create_index(db, collection, index, Some(max_time)).await
    }
}

#[async_trait]
impl Reconciler for IndexResource {
    type State = IndexState;

    const TYPE_NAME: &'static str = "mongodb_db_index";
    const ID_SEGMENTS: usize = 3;

    fn schema(&self) -> Schema {
        let key = Block::new()
            .with_attribute(
                "field",
                Attribute::required_string().with_description("Indexed field"),
            )
            .with_attribute(
                "value",
                Attribute::required_string()
                    .with_description("1, -1, true, false or an index type such as text or 2dsphere"),
            );

        Schema::new(1)
            .with_description("A MongoDB index")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "db",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Database holding the collection"),
            )
            .with_attribute(
                "collection",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Indexed collection"),
            )
            .with_attribute(
                "name",
                Attribute::optional_computed_string()
                    .with_description("Index name, generated from the keys when unset"),
            )
            .with_attribute(
                "unique",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_force_new(),
            )
            .with_attribute(
                "sparse",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_force_new(),
            )
            .with_attribute(
                "bits",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_BITS))
                    .with_force_new()
                    .with_description("Geohash precision, 2d indexes only"),
            )
            .with_attribute(
                "min",
                Attribute::optional_float64()
                    .with_default(json!(DEFAULT_MIN))
                    .with_force_new()
                    .with_description("Lower coordinate bound, 2d indexes only"),
            )
            .with_attribute(
                "max",
                Attribute::optional_float64()
                    .with_default(json!(DEFAULT_MAX))
                    .with_force_new()
                    .with_description("Upper coordinate bound, 2d indexes only"),
            )
            .with_attribute(
                "timeout",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_TIMEOUT_SECS))
                    .with_description("Seconds allowed for the index build"),
            )
            .with_block(
                "keys",
                NestedBlock::list(key).with_min_items(1).with_force_new(),
            )
    }

    #[instrument(skip_all, fields(db = %desired.db, collection = %desired.collection))]
    async fn create(
        &self,
        client: &dyn AdminClient,
        desired: IndexState,
    ) -> Result<IndexState, ProviderError> {
        let name = self
            .build(client, &desired.db, &desired.collection, &desired)
            .await
            .map_err(|err| err.context(format!("could not create index on {}", desired.collection)))?;
        let id = encode_triple(&desired.db, &desired.collection, &name)?;
        info!(index = %name, "Created index");

        self.read(
            client,
            IndexState {
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
        current: IndexState,
    ) -> Result<IndexState, ProviderError> {
        let id = require_id(&current.id, Self::TYPE_NAME)?.to_string();
        let (db, collection, name) = decode_triple(&id)?;

        let indexes = match client.list_indexes(&db, &collection).await {
            Ok(indexes) => indexes,
            Err(err) if err.is_command_code(NAMESPACE_NOT_FOUND) => Vec::new(),
            Err(err) => return Err(err),
        };
        let Some(index) = indexes
            .iter()
            .find(|index| index.get_str("name").is_ok_and(|n| n == name))
        else {
            return Err(ProviderError::NotFound(format!(
                "index {} on {}.{}",
                name, db, collection
            )));
        };

        let keys = match read_keys(index, &current.keys) {
            Some(keys) => keys,
            None if !current.keys.is_empty() => {
                warn!(index = %name, "Index keys cannot be mapped back, keeping the known keys");
                current.keys.clone()
            },
            None => {
                return Err(ProviderError::Response(format!(
                    "index {} has a key document that cannot be mapped to index keys",
                    name
                )))
            },
        };
        debug!(db = %db, collection = %collection, index = %name, "Read index");

        Ok(IndexState {
            id: Some(id),
            unique: index.get_bool("unique").unwrap_or(false),
            sparse: index.get_bool("sparse").unwrap_or(false),
            bits: match index.get("bits") {
                Some(Bson::Int32(bits)) => i64::from(*bits),
                Some(Bson::Int64(bits)) => *bits,
                _ => current.bits,
            },
            min: index.get_f64("min").unwrap_or(current.min),
            max: index.get_f64("max").unwrap_or(current.max),
            timeout: current.timeout,
            db,
            collection,
            name: Some(name),
            keys,
        })
    }

    #[instrument(skip_all)]
    async fn update(
        &self,
        client: &dyn AdminClient,
        prior: IndexState,
        planned: IndexState,
    ) -> Result<IndexState, ProviderError> {
        let id = require_id(&prior.id, Self::TYPE_NAME)?.to_string();
        let (db, collection, prior_name) = decode_triple(&id)?;

        let renamed = planned
            .requested_name()
            .is_some_and(|name| name != prior_name);
        if !renamed && planned.index_document() == prior.index_document() {
            return self.read(client, IndexState { id: Some(id), ..planned }).await;
        }

        client
            .drop_index(&db, &collection, &prior_name)
            .await
            .map_err(|err| err.context(format!("could not drop index {}", prior_name)))?;
        warn!(index = %prior_name, "Dropped index to recreate it");

        let name = self
            .build(client, &db, &collection, &planned)
            .await
            .map_err(|err| {
                err.context(format!(
                    "index {} was dropped and could not be recreated, it is now missing",
                    prior_name
                ))
            })?;
        let id = encode_triple(&db, &collection, &name)?;
        info!(index = %name, "Recreated index");

        self.read(client, IndexState { id: Some(id), ..planned }).await
    }

    #[instrument(skip_all)]
    async fn delete(&self, client: &dyn AdminClient, current: IndexState) -> Result<(), ProviderError> {
        let (db, collection, name) = decode_triple(require_id(&current.id, Self::TYPE_NAME)?)?;

        client
            .drop_index(&db, &collection, &name)
            .await
            .map_err(|err| err.context(format!("could not drop index {}", name)))?;
        info!(db = %db, collection = %collection, index = %name, "Dropped index");
        Ok(())
    }

    fn import(&self, id: &str) -> Result<IndexState, ProviderError> {
        let (db, collection, name) = decode_triple(id)?;
        Ok(IndexState {
            id: Some(id.to_string()),
            db,
            collection,
            name: Some(name),
            keys: Vec::new(),
            unique: false,
            sparse: false,
            bits: DEFAULT_BITS,
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            timeout: DEFAULT_TIMEOUT_SECS,
        })
    }

    fn validate(&self, desired: &IndexState) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        for key in &desired.keys {
            if key.field.is_empty() {
                diagnostics.push(Diagnostic::error("Index key field must not be empty").with_attribute("keys"));
            } else if !seen.insert(key.field.as_str()) {
                diagnostics.push(
                    Diagnostic::error(format!("Duplicate index key field {}", key.field))
                        .with_attribute("keys"),
                );
            }
        }
        if !BITS_RANGE.contains(&desired.bits) {
            diagnostics.push(
                Diagnostic::error(format!(
                    "bits must be between {} and {}",
                    BITS_RANGE.start(),
                    BITS_RANGE.end()
                ))
                .with_attribute("bits"),
            );
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&desired.timeout) {
            diagnostics.push(
                Diagnostic::error(format!("timeout must be between 1 and {} seconds", MAX_TIMEOUT_SECS))
                    .with_attribute("timeout"),
            );
        }
        for (attribute, value) in [("db", &desired.db), ("collection", &desired.collection)] {
            if value.contains('.') {
                diagnostics.push(
                    Diagnostic::error(format!("{} must not contain '.'", attribute))
                        .with_detail("The identifier joins database, collection and index name with '.'")
                        .with_attribute(attribute),
                );
            }
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAdminServer;
    use mongodb::bson::doc;

    fn sku_index(name: Option<&str>) -> IndexState {
        IndexState {
            id: None,
            db: "shop".to_string(),
            collection: "orders".to_string(),
            name: name.map(str::to_string),
            keys: vec![IndexKey::new("sku", IndexKeyValue::Ascending)],
            unique: true,
            sparse: false,
            bits: DEFAULT_BITS,
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[test]
    fn test_key_value_parse() {
        assert_eq!(IndexKeyValue::parse("1"), IndexKeyValue::Ascending);
        assert_eq!(IndexKeyValue::parse("-1"), IndexKeyValue::Descending);
        assert_eq!(IndexKeyValue::parse("false"), IndexKeyValue::Boolean(false));
        assert_eq!(
            IndexKeyValue::parse("2dsphere"),
            IndexKeyValue::Literal("2dsphere".to_string())
        );
        assert_eq!("hashed".parse::<IndexKeyValue>().unwrap().to_string(), "hashed");
    }

    #[test]
    fn test_key_value_from_bson() {
        assert_eq!(IndexKeyValue::from_bson(&Bson::Double(1.0)), IndexKeyValue::Ascending);
        assert_eq!(IndexKeyValue::from_bson(&Bson::Int64(-1)), IndexKeyValue::Descending);
        assert_eq!(IndexKeyValue::from_bson(&Bson::Boolean(true)), IndexKeyValue::Boolean(true));
        assert_eq!(
            IndexKeyValue::from_bson(&Bson::String("text".to_string())),
            IndexKeyValue::Literal("text".to_string())
        );
    }

    #[test]
    fn test_key_value_serde_as_string() {
        let key: IndexKey = serde_json::from_value(json!({"field": "a", "value": "-1"})).unwrap();
        assert_eq!(key.value, IndexKeyValue::Descending);
        assert_eq!(serde_json::to_value(&key).unwrap(), json!({"field": "a", "value": "-1"}));
    }

    #[test]
    fn test_geo_options_only_for_2d() {
        let plain = sku_index(None).index_document();
        assert!(plain.get("bits").is_none());
        assert_eq!(plain.get_bool("unique").unwrap(), true);

        let mut geo = sku_index(None);
        geo.keys = vec![IndexKey::new("loc", IndexKeyValue::parse("2d"))];
        let document = geo.index_document();
        assert_eq!(document.get_i64("bits").unwrap(), 26);
        assert_eq!(document.get_f64("min").unwrap(), -180.0);
        assert_eq!(document.get_document("key").unwrap(), &doc! { "loc": "2d" });
    }

    #[tokio::test]
    async fn test_create_without_name_captures_generated_name() {
        let server = FakeAdminServer::new();
        let state = IndexResource.create(&server, sku_index(None)).await.unwrap();

        // "shop.orders.sku_1"
        assert_eq!(state.id.as_deref(), Some("c2hvcC5vcmRlcnMuc2t1XzE="));
        assert_eq!(state.name.as_deref(), Some("sku_1"));
        assert_eq!(state.keys, vec![IndexKey::new("sku", IndexKeyValue::Ascending)]);
        assert!(state.unique);

        let create = &server.commands()[0];
        assert_eq!(create.name, "createIndexes");
        assert_eq!(create.body.get_i64("maxTimeMS").unwrap(), 30_000);
    }

    #[tokio::test]
    async fn test_create_with_name() {
        let server = FakeAdminServer::new();
        let state = IndexResource
            .create(&server, sku_index(Some("by_sku")))
            .await
            .unwrap();
        assert_eq!(state.name.as_deref(), Some("by_sku"));
        assert_eq!(server.index_names("shop", "orders"), vec!["_id_", "by_sku"]);
    }

    fn text_index() -> IndexState {
        IndexState {
            unique: false,
            keys: vec![
                IndexKey::new("category", IndexKeyValue::Ascending),
                IndexKey::new("title", IndexKeyValue::parse("text")),
                IndexKey::new("body", IndexKeyValue::parse("text")),
            ],
            ..sku_index(None)
        }
    }

    #[tokio::test]
    async fn test_text_index_reads_back_declared_keys() {
        let server = FakeAdminServer::new();
        let desired = text_index();
        let state = IndexResource.create(&server, desired.clone()).await.unwrap();

        assert_eq!(state.name.as_deref(), Some("category_1_title_text_body_text"));
        assert_eq!(state.keys, desired.keys);

        let config = json!({
            "db": "shop",
            "collection": "orders",
            "keys": [
                {"field": "category", "value": "1"},
                {"field": "title", "value": "text"},
                {"field": "body", "value": "text"}
            ]
        });
        let prior = crate::resources::encode_state(&state).unwrap();
        let plan = crate::plan::plan_resource(&IndexResource.schema(), Some(&prior), &config);
        assert!(!plan.requires_replace, "unexpected changes: {:?}", plan.changes);
    }

    #[tokio::test]
    async fn test_imported_text_index_has_recreatable_keys() {
        let server = FakeAdminServer::new();
        let created = IndexResource.create(&server, text_index()).await.unwrap();

        let imported = IndexResource.import(created.id.as_deref().unwrap()).unwrap();
        let state = IndexResource.read(&server, imported).await.unwrap();
        assert_eq!(
            state.keys,
            vec![
                IndexKey::new("category", IndexKeyValue::Ascending),
                IndexKey::new("body", IndexKeyValue::parse("text")),
                IndexKey::new("title", IndexKeyValue::parse("text")),
            ]
        );
        assert!(state.index_document().get_document("key").unwrap().get("_fts").is_none());
    }

    #[test]
    fn test_unmappable_keys_fall_back_to_known_keys() {
        let index = doc! { "name": "title_text", "key": { "_fts": "text", "_ftsx": 1 } };
        assert!(read_keys(&index, &[]).is_none());

        let plain = doc! { "name": "sku_1", "key": { "sku": 1 } };
        assert_eq!(
            read_keys(&plain, &[]).unwrap(),
            vec![IndexKey::new("sku", IndexKeyValue::Ascending)]
        );
    }

    #[tokio::test]
    async fn test_read_absent_index_is_not_found() {
        let server = FakeAdminServer::new();
        server.add_collection("shop", "orders");
        let state = IndexResource
            .import(&crate::id::encode_triple("shop", "orders", "missing_1").unwrap())
            .unwrap();

        let err = IndexResource.read(&server, state).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_missing_collection_is_not_found() {
        let server = FakeAdminServer::new();
        let state = IndexResource.import("c2hvcC5vcmRlcnMuc2t1XzE=").unwrap();

        let err = IndexResource.read(&server, state).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_without_changes_refreshes() {
        let server = FakeAdminServer::new();
        let created = IndexResource.create(&server, sku_index(None)).await.unwrap();

        let mut planned = created.clone();
        planned.timeout = 90;
        let updated = IndexResource.update(&server, created, planned).await.unwrap();

        assert_eq!(updated.timeout, 90);
        assert_eq!(server.count("dropIndexes"), 0);
        assert_eq!(server.count("createIndexes"), 1);
    }

    #[tokio::test]
    async fn test_rename_drops_and_recreates() {
        let server = FakeAdminServer::new();
        let created = IndexResource.create(&server, sku_index(None)).await.unwrap();

        let mut planned = created.clone();
        planned.name = Some("by_sku".to_string());
        let updated = IndexResource.update(&server, created, planned).await.unwrap();

        assert_eq!(updated.name.as_deref(), Some("by_sku"));
        assert_eq!(
            updated.id,
            Some(crate::id::encode_triple("shop", "orders", "by_sku").unwrap())
        );
        assert_eq!(server.index_names("shop", "orders"), vec!["_id_", "by_sku"]);
    }

    #[tokio::test]
    async fn test_failed_recreate_reports_missing_index() {
        let server = FakeAdminServer::new();
        let created = IndexResource.create(&server, sku_index(None)).await.unwrap();
        server.fail_next("createIndexes", 86, "IndexKeySpecsConflict");

        let mut planned = created.clone();
        planned.name = Some("by_sku".to_string());
        let err = IndexResource.update(&server, created, planned).await.unwrap_err();

        assert!(err.message().contains("now missing"));
        assert_eq!(server.index_names("shop", "orders"), vec!["_id_"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let server = FakeAdminServer::new();
        let created = IndexResource.create(&server, sku_index(None)).await.unwrap();

        IndexResource.delete(&server, created.clone()).await.unwrap();
        assert_eq!(server.index_names("shop", "orders"), vec!["_id_"]);

        let err = IndexResource.delete(&server, created).await.unwrap_err();
        assert!(err.is_command_code(27));
    }

    #[test]
    fn test_validate_keys() {
        let mut state = sku_index(None);
        state.keys.push(IndexKey::new("sku", IndexKeyValue::Descending));
        state.keys.push(IndexKey::new("", IndexKeyValue::Ascending));
        assert_eq!(IndexResource.validate(&state).len(), 2);
    }

    #[test]
    fn test_validate_numeric_ranges() {
        let mut state = sku_index(None);
        assert!(IndexResource.validate(&state).is_empty());

        state.bits = 40;
        state.timeout = -5;
        let diagnostics = IndexResource.validate(&state);
        let attributes: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert_eq!(attributes, vec!["bits", "timeout"]);

        state.bits = 32;
        state.timeout = i64::MAX;
        let diagnostics = IndexResource.validate(&state);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("timeout"));
    }

    #[tokio::test]
    async fn test_create_rejects_negative_timeout() {
        let server = FakeAdminServer::new();
        let mut desired = sku_index(None);
        desired.timeout = -1;

        let err = IndexResource.create(&server, desired).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert_eq!(server.count("createIndexes"), 0);
    }
}

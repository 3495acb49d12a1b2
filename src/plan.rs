//! Schema-driven planning.
//!
//! The host sends the prior state (absent on create) and the proposed state
//! from configuration. Planning fills schema defaults, carries computed values
//! over from the prior state, lists the attribute changes and decides whether
//! the change forces a replacement.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{Block, BlockNestingMode, NestedBlock, Schema};

/// Placeholder shown instead of sensitive values in plan output.
pub const SENSITIVE_PLACEHOLDER: &str = "(sensitive value)";

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if deleting).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: change
                .before
                .map(|v| serde_json::to_vec(&v).unwrap_or_default())
                .unwrap_or_default(),
            after: change
                .after
                .map(|v| serde_json::to_vec(&v).unwrap_or_default())
                .unwrap_or_default(),
        }
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation (null when the resource is destroyed).
    pub planned_state: Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether the plan changes anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Plan a resource change against its schema.
///
/// A null `proposed` state plans a destroy.
pub fn plan_resource(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let prior = prior.filter(|state| !state.is_null());

    if proposed.is_null() {
        let changes = prior
            .map(|state| listed_changes(&schema.block, state, |name, value| {
                AttributeChange::removed(name, value)
            }))
            .unwrap_or_default();
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let mut planned = proposed.clone();
    fill_defaults(&schema.block, &mut planned);

    let Some(prior) = prior else {
        let changes = listed_changes(&schema.block, &planned, |name, value| {
            AttributeChange::added(name, value)
        });
        return PlanResult::with_changes(planned, changes, false);
    };

    let carried = carry_computed(&schema.block, prior, &mut planned);

    let mut changes = Vec::new();
    let mut requires_replace = false;

    for (name, attr) in &schema.block.attributes {
        let before = field(prior, name);
        let after = field(&planned, name);
        if before == after {
            continue;
        }
        requires_replace |= attr.force_new;
        let change = if attr.flags.sensitive {
            AttributeChange::new(
                name.as_str(),
                (!before.is_null()).then(sensitive_placeholder),
                (!after.is_null()).then(sensitive_placeholder),
            )
        } else {
            change_between(name, before, after)
        };
        changes.push(change);
    }

    for (name, nested) in &schema.block.blocks {
        let before = field(prior, name);
        let after = field(&planned, name);
        if blocks_equal(nested, before, after) {
            continue;
        }
        requires_replace |= nested.force_new;
        changes.push(change_between(name, before, after));
    }

    if requires_replace {
        // The replacement gets fresh server-assigned values.
        if let Value::Object(map) = &mut planned {
            for name in &carried {
                map.insert(name.clone(), Value::Null);
            }
        }
    }

    PlanResult::with_changes(planned, changes, requires_replace)
}

/// Fill schema defaults for unset attributes, recursing into nested blocks.
pub fn fill_defaults(block: &Block, value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };

    for (name, attr) in &block.attributes {
        if let Some(default) = &attr.default {
            let unset = map.get(name).is_none_or(Value::is_null);
            if unset {
                map.insert(name.clone(), default.clone());
            }
        }
    }

    for (name, nested) in &block.blocks {
        match map.get_mut(name) {
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    fill_defaults(&nested.block, item);
                }
            },
            Some(Value::Null) | None => {
                map.insert(name.clone(), Value::Array(Vec::new()));
            },
            Some(_) => {},
        }
    }
}

/// Copy computed values the proposed state leaves unset from the prior
/// state, returning the names that were carried.
fn carry_computed(block: &Block, prior: &Value, planned: &mut Value) -> Vec<String> {
    let mut carried = Vec::new();
    let Value::Object(map) = planned else {
        return carried;
    };

    for (name, attr) in &block.attributes {
        if !attr.flags.computed {
            continue;
        }
        let unset = map.get(name).is_none_or(Value::is_null);
        let prior_value = field(prior, name);
        if unset && !prior_value.is_null() {
            map.insert(name.clone(), prior_value.clone());
            carried.push(name.clone());
        }
    }

    carried
}

fn listed_changes(
    block: &Block,
    state: &Value,
    make: fn(String, Value) -> AttributeChange,
) -> Vec<AttributeChange> {
    let mut changes = Vec::new();
    for (name, attr) in &block.attributes {
        let value = field(state, name);
        if value.is_null() {
            continue;
        }
        let value = if attr.flags.sensitive {
            sensitive_placeholder()
        } else {
            value.clone()
        };
        changes.push(make(name.clone(), value));
    }
    for name in block.blocks.keys() {
        let value = field(state, name);
        if value.as_array().is_some_and(|items| !items.is_empty()) {
            changes.push(make(name.clone(), value.clone()));
        }
    }
    changes
}

fn change_between(name: &str, before: &Value, after: &Value) -> AttributeChange {
    match (before.is_null(), after.is_null()) {
        (true, _) => AttributeChange::added(name, after.clone()),
        (_, true) => AttributeChange::removed(name, before.clone()),
        _ => AttributeChange::modified(name, before.clone(), after.clone()),
    }
}

fn blocks_equal(nested: &NestedBlock, before: &Value, after: &Value) -> bool {
    normalize_items(nested, before) == normalize_items(nested, after)
}

/// Null and empty lists compare equal, set items compare order-insensitively.
fn normalize_items(nested: &NestedBlock, value: &Value) -> Vec<Value> {
    let mut items: Vec<Value> = match value {
        Value::Array(items) => items.iter().map(normalize_item).collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };
    if nested.nesting_mode == BlockNestingMode::Set {
        items.sort_by_cached_key(|item| item.to_string());
        items.dedup();
    }
    items
}

fn normalize_item(item: &Value) -> Value {
    match item {
        Value::Object(map) => {
            let normalized: Map<String, Value> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), normalize_item(v)))
                .collect();
            Value::Object(normalized)
        },
        Value::Array(values) if values.iter().all(Value::is_string) => {
            let mut values = values.clone();
            values.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            Value::Array(values)
        },
        other => other.clone(),
    }
}

fn field<'a>(state: &'a Value, name: &str) -> &'a Value {
    state.get(name).unwrap_or(&Value::Null)
}

fn sensitive_placeholder() -> Value {
    Value::String(SENSITIVE_PLACEHOLDER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, NestedBlock};
    use serde_json::json;

    fn index_schema() -> Schema {
        Schema::new(1)
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("db", Attribute::required_string().with_force_new())
            .with_attribute("name", Attribute::optional_computed_string().with_force_new())
            .with_attribute("unique", Attribute::optional_bool().with_default(json!(false)).with_force_new())
            .with_attribute("timeout", Attribute::optional_int64().with_default(json!(30)))
            .with_block(
                "keys",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("field", Attribute::required_string())
                        .with_attribute("value", Attribute::required_string()),
                )
                .with_force_new(),
            )
    }

    fn role_schema() -> Schema {
        Schema::new(1)
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_block(
                "privilege",
                NestedBlock::set(
                    Block::new()
                        .with_attribute("db", Attribute::required_string())
                        .with_attribute("collection", Attribute::optional_string())
                        .with_attribute(
                            "actions",
                            Attribute::new(
                                AttributeType::list(AttributeType::String),
                                AttributeFlags::required(),
                            ),
                        ),
                ),
            )
    }

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("name", json!("alice"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("alice")));

        let removed = AttributeChange::removed("name", json!("old"));
        assert_eq!(removed.before, Some(json!("old")));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("timeout", json!(30), json!(60));
        assert_eq!(modified.before, Some(json!(30)));
        assert_eq!(modified.after, Some(json!(60)));
    }

    #[test]
    fn test_attribute_change_to_proto() {
        let change = AttributeChange::added("db", json!("shop"));
        let proto: crate::generated::AttributeChange = change.into();
        assert_eq!(proto.path, "db");
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, b"\"shop\"".to_vec());
    }

    #[test]
    fn test_create_plan_applies_defaults() {
        let proposed = json!({"db": "shop", "keys": [{"field": "sku", "value": "1"}]});
        let result = plan_resource(&index_schema(), None, &proposed);

        assert!(!result.requires_replace);
        assert_eq!(result.planned_state["unique"], json!(false));
        assert_eq!(result.planned_state["timeout"], json!(30));
        let paths: Vec<&str> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["db", "timeout", "unique", "keys"]);
    }

    #[test]
    fn test_unchanged_plan_carries_computed_values() {
        let prior = json!({
            "id": "c2hvcC5vcmRlcnMuc2t1XzE=",
            "db": "shop",
            "name": "sku_1",
            "unique": false,
            "timeout": 30,
            "keys": [{"field": "sku", "value": "1"}]
        });
        let proposed = json!({
            "id": null,
            "db": "shop",
            "name": null,
            "keys": [{"field": "sku", "value": "1"}]
        });

        let result = plan_resource(&index_schema(), Some(&prior), &proposed);
        assert!(!result.has_changes());
        assert_eq!(result.planned_state["id"], prior["id"]);
        assert_eq!(result.planned_state["name"], json!("sku_1"));
    }

    #[test]
    fn test_force_new_change_requires_replace() {
        let prior = json!({
            "id": "abc",
            "db": "shop",
            "name": "sku_1",
            "unique": false,
            "timeout": 30,
            "keys": [{"field": "sku", "value": "1"}]
        });
        let proposed = json!({"db": "shop", "unique": true, "keys": [{"field": "sku", "value": "1"}]});

        let result = plan_resource(&index_schema(), Some(&prior), &proposed);
        assert!(result.requires_replace);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "unique");
        assert_eq!(result.planned_state["id"], Value::Null);
        assert_eq!(result.planned_state["name"], Value::Null);
    }

    #[test]
    fn test_local_attribute_change_is_in_place() {
        let prior = json!({
            "id": "abc",
            "db": "shop",
            "name": "sku_1",
            "unique": false,
            "timeout": 30,
            "keys": [{"field": "sku", "value": "1"}]
        });
        let proposed = json!({"db": "shop", "timeout": 90, "keys": [{"field": "sku", "value": "1"}]});

        let result = plan_resource(&index_schema(), Some(&prior), &proposed);
        assert!(!result.requires_replace);
        assert_eq!(
            result.changes,
            vec![AttributeChange::modified("timeout", json!(30), json!(90))]
        );
        assert_eq!(result.planned_state["id"], json!("abc"));
    }

    #[test]
    fn test_key_order_change_requires_replace() {
        let prior = json!({
            "id": "abc",
            "db": "shop",
            "keys": [{"field": "a", "value": "1"}, {"field": "b", "value": "-1"}]
        });
        let proposed = json!({
            "db": "shop",
            "keys": [{"field": "b", "value": "-1"}, {"field": "a", "value": "1"}]
        });

        let result = plan_resource(&index_schema(), Some(&prior), &proposed);
        assert!(result.requires_replace);
    }

    #[test]
    fn test_set_blocks_compare_without_order() {
        let prior = json!({
            "id": "abc",
            "name": "reader",
            "privilege": [
                {"db": "shop", "collection": "orders", "actions": ["find", "insert"]},
                {"db": "shop", "collection": "", "actions": ["listCollections"]}
            ]
        });
        let proposed = json!({
            "name": "reader",
            "privilege": [
                {"db": "shop", "collection": "", "actions": ["listCollections"]},
                {"db": "shop", "collection": "orders", "actions": ["insert", "find"]}
            ]
        });

        let result = plan_resource(&role_schema(), Some(&prior), &proposed);
        assert!(!result.has_changes());
    }

    #[test]
    fn test_set_block_change_is_reported() {
        let prior = json!({"id": "abc", "name": "reader", "privilege": []});
        let proposed = json!({
            "name": "reader",
            "privilege": [{"db": "shop", "actions": ["find"]}]
        });

        let result = plan_resource(&role_schema(), Some(&prior), &proposed);
        assert!(!result.requires_replace);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "privilege");
    }

    #[test]
    fn test_sensitive_values_are_masked() {
        let schema = Schema::new(1)
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("password", Attribute::required_string().sensitive());

        let result = plan_resource(&schema, None, &json!({"password": "pw"}));
        assert_eq!(result.changes[0].after, Some(json!(SENSITIVE_PLACEHOLDER)));

        let prior = json!({"id": "x", "password": "old"});
        let result = plan_resource(&schema, Some(&prior), &json!({"password": "new"}));
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].before, Some(json!(SENSITIVE_PLACEHOLDER)));
        assert_eq!(result.planned_state["password"], json!("new"));
    }

    #[test]
    fn test_destroy_plan() {
        let prior = json!({"id": "abc", "db": "shop", "keys": []});
        let result = plan_resource(&index_schema(), Some(&prior), &Value::Null);

        assert!(result.planned_state.is_null());
        assert!(result.changes.iter().all(|c| c.after.is_none()));
        assert!(result.changes.iter().any(|c| c.path == "db"));
    }

    #[test]
    fn test_plan_result_constructors() {
        let no_change = PlanResult::no_change(json!({"id": "abc"}));
        assert!(!no_change.has_changes());
        assert!(!no_change.requires_replace);

        let with_changes = PlanResult::with_changes(
            json!({"id": "abc"}),
            vec![AttributeChange::added("db", json!("shop"))],
            true,
        );
        assert!(with_changes.has_changes());
        assert!(with_changes.requires_replace);
    }
}

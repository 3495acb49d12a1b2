//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` against a [`Schema`] and reports every
//! problem as a [`Diagnostic`] carrying the attribute path.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_mongodb::schema::{Attribute, Schema};
//! use hemmer_provider_mongodb::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::new(1)
//!     .with_attribute("db", Attribute::required_string())
//!     .with_attribute("deletion_protection", Attribute::optional_bool());
//!
//! let diagnostics = validate(&schema, &json!({"db": "shop", "deletion_protection": false}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"db": "shop", "deletion_protection": "no"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("deletion_protection".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use serde_json::Value;

/// Check `value` against `schema`; an empty result means it is valid.
///
/// Computed-only attributes are ignored, required ones must be non-null,
/// types must match, allowed values are enforced on string leaves, and keys
/// the schema does not declare are rejected. Nested blocks are checked
/// element by element after their item limits.
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut checker = Checker::default();
    checker.block(&schema.block, value, &Path::root());
    checker.diagnostics
}

/// [`validate`], as a `Result`.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    match validate(schema, value) {
        diagnostics if diagnostics.is_empty() => Ok(()),
        diagnostics => Err(diagnostics),
    }
}

/// `value` passes [`validate`] without any diagnostic.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Dotted attribute path, `keys.0.field`.
struct Path(String);

impl Path {
    fn root() -> Self {
        Self(String::new())
    }

    fn child(&self, segment: impl std::fmt::Display) -> Self {
        if self.0.is_empty() {
            Self(segment.to_string())
        } else {
            Self(format!("{}.{}", self.0, segment))
        }
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Default)]
struct Checker {
    diagnostics: Vec<Diagnostic>,
}

impl Checker {
    fn report(&mut self, path: &Path, summary: String, detail: Option<String>) {
        let mut diagnostic = Diagnostic::error(summary);
        if let Some(detail) = detail {
            diagnostic = diagnostic.with_detail(detail);
        }
        if !path.as_str().is_empty() {
            diagnostic = diagnostic.with_attribute(path.as_str());
        }
        self.diagnostics.push(diagnostic);
    }

    fn block(&mut self, block: &Block, value: &Value, path: &Path) {
        let fields = match value {
            Value::Null => return,
            Value::Object(fields) => fields,
            other => {
                let detail = format!("Got {}", kind_of(other));
                return self.report(path, "Expected object".to_string(), Some(detail));
            },
        };

        for (name, attr) in &block.attributes {
            self.attribute(attr, fields.get(name), &path.child(name));
        }
        for (name, nested) in &block.blocks {
            self.nested(nested, fields.get(name), &path.child(name));
        }

        let undeclared = fields
            .keys()
            .filter(|key| !block.attributes.contains_key(*key) && !block.blocks.contains_key(*key));
        for key in undeclared {
            let key_path = path.child(key);
            self.report(
                &key_path,
                format!("Unsupported argument '{}'", key_path.as_str()),
                Some("An argument with this name is not expected here".to_string()),
            );
        }
    }

    fn attribute(&mut self, attr: &Attribute, value: Option<&Value>, path: &Path) {
        if attr.flags.is_computed_only() {
            return;
        }
        match value {
            Some(Value::Null) | None if attr.flags.required => self.report(
                path,
                format!("Missing required attribute '{}'", path.as_str()),
                Some("This attribute is required and must be provided".to_string()),
            ),
            Some(Value::Null) | None => {},
            Some(value) => {
                self.typed(&attr.attr_type, value, path);
                if !attr.allowed_values.is_empty() {
                    self.allowed(&attr.allowed_values, value, path);
                }
            },
        }
    }

    fn typed(&mut self, attr_type: &AttributeType, value: &Value, path: &Path) {
        let expected = match (attr_type, value) {
            (AttributeType::String, Value::String(_)) | (AttributeType::Bool, Value::Bool(_)) => return,
            (AttributeType::Float64, Value::Number(_)) => return,
            (AttributeType::Int64, Value::Number(n)) if is_whole(n) => return,
            (AttributeType::List(element), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    self.typed(element, item, &path.child(i));
                }
                return;
            },
            (AttributeType::Map(element), Value::Object(entries)) => {
                for (key, item) in entries {
                    self.typed(element, item, &path.child(key));
                }
                return;
            },
            (AttributeType::String, _) => "string",
            (AttributeType::Int64, _) => "int64",
            (AttributeType::Float64, _) => "float64",
            (AttributeType::Bool, _) => "bool",
            (AttributeType::List(_), _) => "list",
            (AttributeType::Map(_), _) => "map",
        };
        self.report(
            path,
            format!("Invalid type for attribute '{}'", path.as_str()),
            Some(format!("Expected {}, got {}", expected, kind_of(value))),
        );
    }

    /// Strings directly, and the string leaves of lists and maps.
    fn allowed(&mut self, allowed: &[String], value: &Value, path: &Path) {
        match value {
            Value::String(s) if !allowed.iter().any(|a| a == s) => self.report(
                path,
                format!("Invalid value for attribute '{}'", path.as_str()),
                Some(format!("Expected one of [{}], got \"{}\"", allowed.join(", "), s)),
            ),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.allowed(allowed, item, &path.child(i));
                }
            },
            Value::Object(entries) => {
                for (key, item) in entries {
                    self.allowed(allowed, item, &path.child(key));
                }
            },
            _ => {},
        }
    }

    fn nested(&mut self, nested: &NestedBlock, value: Option<&Value>, path: &Path) {
        let items = match value {
            None | Some(Value::Null) => {
                if nested.min_items > 0 {
                    self.report(
                        path,
                        format!("Block '{}' requires at least {} item(s)", path.as_str(), nested.min_items),
                        None,
                    );
                }
                return;
            },
            Some(Value::Array(items)) => items,
            Some(other) => {
                let detail = format!("Got {}", kind_of(other));
                return self.report(path, format!("Expected list for block '{}'", path.as_str()), Some(detail));
            },
        };

        let count = items.len() as u32;
        if count < nested.min_items {
            self.report(
                path,
                format!(
                    "Block '{}' requires at least {} item(s), got {}",
                    path.as_str(),
                    nested.min_items,
                    count
                ),
                None,
            );
        }
        if nested.max_items != 0 && count > nested.max_items {
            self.report(
                path,
                format!(
                    "Block '{}' allows at most {} item(s), got {}",
                    path.as_str(),
                    nested.max_items,
                    count
                ),
                None,
            );
        }
        for (i, item) in items.iter().enumerate() {
            self.block(&nested.block, item, &path.child(i));
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Integers, and floats without a fractional part such as `30.0`.
fn is_whole(n: &serde_json::Number) -> bool {
    n.is_i64()
        || n
            .as_f64()
            .is_some_and(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeFlags, Block, NestedBlock, Schema};
    use serde_json::json;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::new(1).with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "alice"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(&schema, &json!({"name": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_optional_attribute() {
        let schema = Schema::new(1).with_attribute("timeout", Attribute::optional_int64());

        assert!(validate(&schema, &json!({"timeout": 30})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"timeout": null})).is_empty());
        assert!(validate(&schema, &json!({"timeout": 30.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"timeout": 1.5})).len(), 1);
        assert_eq!(validate(&schema, &json!({"timeout": "30"})).len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::new(1).with_attribute("id", Attribute::computed_string());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"id": 123})).is_empty());
    }

    #[test]
    fn test_validate_float_accepts_integers() {
        let schema = Schema::new(1).with_attribute("max", Attribute::optional_float64());

        assert!(validate(&schema, &json!({"max": 180})).is_empty());
        assert!(validate(&schema, &json!({"max": -180.5})).is_empty());
        assert_eq!(validate(&schema, &json!({"max": true})).len(), 1);
    }

    #[test]
    fn test_validate_map_with_allowed_values() {
        let schema = Schema::new(0).with_attribute(
            "missing_resource_policy",
            Attribute::new(
                AttributeType::map(AttributeType::String),
                AttributeFlags::optional(),
            )
            .with_allowed_values(["error", "remove"]),
        );

        let ok = json!({"missing_resource_policy": {"mongodb_db_user": "remove"}});
        assert!(is_valid(&schema, &ok));

        let bad = json!({"missing_resource_policy": {"mongodb_db_user": "ignore"}});
        let diagnostics = validate(&schema, &bad);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("missing_resource_policy.mongodb_db_user".to_string())
        );
        assert!(diagnostics[0].detail.as_deref().unwrap().contains("error, remove"));

        let wrong_type = json!({"missing_resource_policy": {"mongodb_db_user": 1}});
        assert_eq!(validate(&schema, &wrong_type).len(), 1);
    }

    #[test]
    fn test_validate_list_of_strings() {
        let schema = Schema::new(1).with_attribute(
            "actions",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::required(),
            ),
        );

        assert!(validate(&schema, &json!({"actions": ["find", "insert"]})).is_empty());

        let diagnostics = validate(&schema, &json!({"actions": ["find", 2]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("actions.1".to_string()));

        assert_eq!(validate(&schema, &json!({"actions": "find"})).len(), 1);
    }

    #[test]
    fn test_validate_unknown_attribute() {
        let schema = Schema::new(1).with_attribute("db", Attribute::required_string());

        let diagnostics = validate(&schema, &json!({"db": "shop", "dbname": "shop"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Unsupported argument 'dbname'"));
    }

    #[test]
    fn test_validate_block_item_limits() {
        let role = Block::new()
            .with_attribute("role", Attribute::required_string())
            .with_attribute("db", Attribute::required_string());
        let schema = Schema::new(1)
            .with_block("role", NestedBlock::set(role).with_max_items(2))
            .with_block(
                "keys",
                NestedBlock::list(Block::new().with_attribute("field", Attribute::required_string()))
                    .with_min_items(1),
            );

        let ok = json!({
            "role": [{"role": "read", "db": "shop"}],
            "keys": [{"field": "sku"}]
        });
        assert!(validate(&schema, &ok).is_empty());

        let too_many = json!({
            "role": [
                {"role": "read", "db": "a"},
                {"role": "read", "db": "b"},
                {"role": "read", "db": "c"}
            ],
            "keys": [{"field": "sku"}]
        });
        let diagnostics = validate(&schema, &too_many);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 2"));

        let missing_keys = json!({"role": []});
        let diagnostics = validate(&schema, &missing_keys);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("keys".to_string()));
    }

    #[test]
    fn test_validate_nested_errors_carry_paths() {
        let schema = Schema::new(1).with_block(
            "privilege",
            NestedBlock::set(
                Block::new()
                    .with_attribute("db", Attribute::required_string())
                    .with_attribute("collection", Attribute::optional_string()),
            ),
        );

        let value = json!({"privilege": [{"collection": "orders"}]});
        let diagnostics = validate(&schema, &value);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("privilege.0.db".to_string()));

        let diagnostics = validate(&schema, &json!({"privilege": {"db": "x"}}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected list"));
    }

    #[test]
    fn test_validate_result() {
        let schema = Schema::new(1).with_attribute("name", Attribute::required_string());

        assert!(validate_result(&schema, &json!({"name": "x"})).is_ok());
        assert_eq!(validate_result(&schema, &json!({})).unwrap_err().len(), 1);
        assert!(!is_valid(&schema, &json!("not an object")));
    }
}

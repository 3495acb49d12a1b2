//! Schema types for describing provider configuration and resources.
//!
//! Schemas describe the shape of the provider configuration and of each
//! resource. They drive validation, planning (defaults, force-new, computed
//! values) and are sent to the host through `GetSchema`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value type of an attribute, sent to the host as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Int64,
    /// Double precision number.
    Float64,
    /// `true` or `false`.
    Bool,
    /// Homogeneous list.
    List(Box<AttributeType>),
    /// String-keyed map with homogeneous values.
    Map(Box<AttributeType>),
}

impl AttributeType {
    /// `list(element)`
    pub fn list(element: AttributeType) -> Self {
        Self::List(Box::new(element))
    }

    /// `map(string => element)`
    pub fn map(element: AttributeType) -> Self {
        Self::Map(Box::new(element))
    }
}

/// Who may set an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// Configuration must set it.
    pub required: bool,
    /// Configuration may set it.
    pub optional: bool,
    /// The provider sets it.
    pub computed: bool,
    /// Redacted in plans and logs.
    pub sensitive: bool,
}

impl AttributeFlags {
    const NONE: Self = Self {
        required: false,
        optional: false,
        computed: false,
        sensitive: false,
    };

    /// Configuration must set the attribute.
    pub const fn required() -> Self {
        Self { required: true, ..Self::NONE }
    }

    /// Configuration may set the attribute.
    pub const fn optional() -> Self {
        Self { optional: true, ..Self::NONE }
    }

    /// Only the provider sets the attribute.
    pub const fn computed() -> Self {
        Self { computed: true, ..Self::NONE }
    }

    /// Configuration may set the attribute; the provider fills it when unset.
    pub const fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Self::NONE
        }
    }

    /// Configuration has no say over the attribute.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !(self.optional || self.required)
    }
}

/// One attribute of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Usage flags.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Shown to users by the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A change to this attribute replaces the resource.
    #[serde(default)]
    pub force_new: bool,
    /// Value planned when configuration leaves the attribute unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Closed set of accepted strings; empty accepts anything. Applies to
    /// string attributes and to the values of string maps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
}

impl Attribute {
    /// An attribute of `attr_type` used as `flags` says.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
            allowed_values: Vec::new(),
        }
    }

    /// `string`, required.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// `string`, optional.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// `string`, provider-set.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// `string`, optional and filled by the provider when unset.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    /// `int64`, optional.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// `float64`, optional.
    pub fn optional_float64() -> Self {
        Self::new(AttributeType::Float64, AttributeFlags::optional())
    }

    /// `bool`, optional.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Attach a user-facing description.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }

    /// Replace the resource whenever this attribute changes.
    pub fn with_force_new(self) -> Self {
        Self { force_new: true, ..self }
    }

    /// Plan `default` when the attribute is unset.
    pub fn with_default(self, default: serde_json::Value) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    /// Accept only `values`.
    pub fn with_allowed_values<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_values: values.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Redact the value in plans and logs.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }
}

/// How repeated nested blocks are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// Order matters.
    #[default]
    List,
    /// Order is ignored.
    Set,
}

/// Attributes plus nested blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Block {
    /// Attributes by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// Nested blocks by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocks: BTreeMap<String, NestedBlock>,
    /// Shown to users by the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Block {
    /// A block with nothing in it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `attr` under `name`.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add `nested` under `name`.
    pub fn with_block(mut self, name: impl Into<String>, nested: NestedBlock) -> Self {
        self.blocks.insert(name.into(), nested);
        self
    }

    /// Attach a user-facing description.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }
}

/// A repeated block, such as the roles of a user or the keys of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    /// Shape of each element.
    #[serde(flatten)]
    pub block: Block,
    /// List or set semantics.
    #[serde(default)]
    pub nesting_mode: BlockNestingMode,
    /// Fewest elements accepted.
    #[serde(default)]
    pub min_items: u32,
    /// Most elements accepted, 0 for no limit.
    #[serde(default)]
    pub max_items: u32,
    /// Any change to the elements replaces the resource.
    #[serde(default)]
    pub force_new: bool,
}

impl NestedBlock {
    fn with_mode(block: Block, nesting_mode: BlockNestingMode) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items: 0,
            force_new: false,
        }
    }

    /// Ordered elements.
    pub fn list(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::List)
    }

    /// Unordered elements.
    pub fn set(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Set)
    }

    /// Require at least `min` elements.
    pub fn with_min_items(self, min: u32) -> Self {
        Self { min_items: min, ..self }
    }

    /// Allow at most `max` elements.
    pub fn with_max_items(self, max: u32) -> Self {
        Self { max_items: max, ..self }
    }

    /// Replace the resource whenever the elements change.
    pub fn with_force_new(self) -> Self {
        Self { force_new: true, ..self }
    }
}

/// A versioned root block.
///
/// Resource schemas are at version 1; version 0 state carries hex encoded
/// identifiers and is upgraded through `UpgradeResourceState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schema {
    /// Version recorded alongside state written under this schema.
    #[serde(default)]
    pub version: u64,
    /// Root block.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// An empty schema at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Add `attr` to the root block.
    pub fn with_attribute(self, name: impl Into<String>, attr: Attribute) -> Self {
        Self {
            block: self.block.with_attribute(name, attr),
            ..self
        }
    }

    /// Add `nested` to the root block.
    pub fn with_block(self, name: impl Into<String>, nested: NestedBlock) -> Self {
        Self {
            block: self.block.with_block(name, nested),
            ..self
        }
    }

    /// Describe the root block.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            block: self.block.with_description(description),
            ..self
        }
    }

    /// Root attribute `name`.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.get(name)
    }

    /// Root nested block `name`.
    pub fn nested_block(&self, name: &str) -> Option<&NestedBlock> {
        self.block.blocks.get(name)
    }
}

/// Provider configuration schema plus one schema per resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// The `provider` block.
    #[serde(default)]
    pub provider: Schema,
    /// Resource schemas by type name.
    #[serde(default)]
    pub resources: BTreeMap<String, Schema>,
}

impl ProviderSchema {
    /// No provider attributes and no resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `schema` for the `provider` block.
    pub fn with_provider_config(self, schema: Schema) -> Self {
        Self {
            provider: schema,
            ..self
        }
    }

    /// Register `schema` for resource type `name`.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }
}

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// The host stops the operation.
    Error,
    /// Reported to the user only.
    Warning,
}

/// A problem reported back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: DiagnosticSeverity,
    /// One line.
    pub summary: String,
    /// Longer explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Attribute the problem is about, e.g. `keys.0.field`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn with_severity(severity: DiagnosticSeverity, summary: String) -> Self {
        Self {
            severity,
            summary,
            detail: None,
            attribute: None,
        }
    }

    /// An error with `summary`.
    pub fn error(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Error, summary.into())
    }

    /// A warning with `summary`.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Warning, summary.into())
    }

    /// Attach a longer explanation.
    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..self
        }
    }

    /// Point at `attribute`.
    pub fn with_attribute(self, attribute: impl Into<String>) -> Self {
        Self {
            attribute: Some(attribute.into()),
            ..self
        }
    }

    /// Severity is [`DiagnosticSeverity::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self.severity, DiagnosticSeverity::Error)
    }
}

/// At least one of `diagnostics` is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

//! Field specifications for declared output schemas.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Specification for one field of a declared output schema.
///
/// # Example
///
/// ```
/// use openrouter_structured::schema::{FieldSpec, FieldType};
///
/// let field = FieldSpec::new("query", FieldType::String)
///     .with_description("The search query to execute");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name as it appears in the JSON object
    pub name: String,
    /// Field type for schema generation and validation
    pub field_type: FieldType,
    /// Human-readable description (surfaced in schema hints)
    pub description: String,
    /// Whether the field is required
    pub required: bool,
}

impl FieldSpec {
    /// Create a new required field specification.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: String::new(),
            required: true,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the field as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Format the field for a schema hint block.
    ///
    /// Returns a string like "query (string): The search query to execute".
    pub fn to_hint_line(&self) -> String {
        let type_hint = self.field_type.to_prompt_hint();
        let required_marker = if self.required { "" } else { " (optional)" };

        if self.description.is_empty() {
            format!("{} ({type_hint}){required_marker}", self.name)
        } else {
            format!(
                "{} ({type_hint}){required_marker}: {}",
                self.name, self.description
            )
        }
    }
}

/// Type of a field, for strict schema generation and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldType {
    /// String value
    String,
    /// Integer value (any size)
    Integer,
    /// Floating point value
    Float,
    /// Boolean value
    Boolean,
    /// List of items of a specific type
    List(Box<FieldType>),
    /// Nested object with fields
    Object(Vec<FieldSpec>),
    /// Enumeration with allowed string values
    Enum(Vec<String>),
}

impl FieldType {
    /// Create a list type.
    pub fn list(inner: FieldType) -> Self {
        Self::List(Box::new(inner))
    }

    /// Create an object type with fields.
    pub fn object(fields: Vec<FieldSpec>) -> Self {
        Self::Object(fields)
    }

    /// Create an enum type with allowed values.
    pub fn enum_of(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Enum(values.into_iter().map(|v| v.into()).collect())
    }

    /// Get a hint string for prompts (e.g. "string", "list[string]").
    pub fn to_prompt_hint(&self) -> String {
        match self {
            Self::String => "string".to_string(),
            Self::Integer => "integer".to_string(),
            Self::Float => "number".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::List(inner) => format!("list[{}]", inner.to_prompt_hint()),
            Self::Object(_) => "object".to_string(),
            Self::Enum(values) => {
                if values.len() <= 5 {
                    values.join("|")
                } else {
                    format!("one of {} values", values.len())
                }
            }
        }
    }

    /// Generate a strict JSON-Schema fragment for this type.
    ///
    /// Object levels always carry `"additionalProperties": false`; the
    /// remote API's strict structured-output mode rejects open object
    /// shapes.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::String => serde_json::json!({ "type": "string" }),
            Self::Integer => serde_json::json!({ "type": "integer" }),
            Self::Float => serde_json::json!({ "type": "number" }),
            Self::Boolean => serde_json::json!({ "type": "boolean" }),
            Self::List(inner) => serde_json::json!({
                "type": "array",
                "items": inner.to_json_schema()
            }),
            Self::Object(fields) => object_schema(fields),
            Self::Enum(values) => serde_json::json!({
                "type": "string",
                "enum": values
            }),
        }
    }
}

impl Default for FieldType {
    fn default() -> Self {
        Self::String
    }
}

/// Build a closed object schema from a field list.
pub(crate) fn object_schema(fields: &[FieldSpec]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.name.clone(), f.field_type.to_json_schema()))
        .collect();
    let required: Vec<&str> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name.as_str())
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

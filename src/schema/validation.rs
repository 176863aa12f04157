//! Validation of parsed model output against a declared schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::types::{FieldSpec, FieldType};

/// Structured diagnostic for one validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum ValidationError {
    /// A required field is missing.
    MissingField {
        /// Name of the missing field
        field: String,
        /// Expected type of the field
        expected_type: FieldType,
    },

    /// Field value has the wrong type.
    TypeMismatch {
        /// Name of the field
        field: String,
        /// Expected type
        expected: FieldType,
        /// Actual type description
        got: String,
        /// Preview of the actual value (first 100 chars)
        value_preview: String,
    },

    /// Enum field has a value outside the allowed set.
    EnumInvalid {
        /// Name of the field
        field: String,
        /// The invalid value that was provided
        value: String,
        /// List of allowed values
        allowed: Vec<String>,
    },

    /// Nested object validation failed.
    NestedError {
        /// Path to the nested field (e.g. "items[2].name")
        path: String,
        /// The underlying validation error
        error: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>, expected_type: FieldType) -> Self {
        Self::MissingField {
            field: field.into(),
            expected_type,
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(field: impl Into<String>, expected: FieldType, value: &Value) -> Self {
        let got = value_type_name(value);
        let value_preview = truncate_preview(&value.to_string(), 100);
        Self::TypeMismatch {
            field: field.into(),
            expected,
            got,
            value_preview,
        }
    }

    /// Create an enum invalid error.
    pub fn enum_invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        allowed: Vec<String>,
    ) -> Self {
        Self::EnumInvalid {
            field: field.into(),
            value: value.into(),
            allowed,
        }
    }

    /// Wrap this error with a path prefix for nested fields.
    pub fn with_path(self, parent: impl Into<String>) -> Self {
        let parent = parent.into();
        match self {
            Self::NestedError { path, error } => Self::NestedError {
                path: format!("{}.{}", parent, path),
                error,
            },
            other => Self::NestedError {
                path: parent,
                error: Box::new(other),
            },
        }
    }

    /// Get a human-readable error message.
    pub fn to_user_message(&self) -> String {
        match self {
            Self::MissingField {
                field,
                expected_type,
            } => {
                format!(
                    "Missing required field '{}' (expected {})",
                    field,
                    expected_type.to_prompt_hint()
                )
            }
            Self::TypeMismatch {
                field,
                expected,
                got,
                value_preview,
            } => {
                format!(
                    "Field '{}' has wrong type: expected {}, got {} (value: {})",
                    field,
                    expected.to_prompt_hint(),
                    got,
                    value_preview
                )
            }
            Self::EnumInvalid {
                field,
                value,
                allowed,
            } => {
                format!(
                    "Field '{}' has invalid value '{}'. Allowed values: {}",
                    field,
                    value,
                    allowed.join(", ")
                )
            }
            Self::NestedError { path, error } => {
                format!("At '{}': {}", path, error.to_user_message())
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_user_message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a value against a field list.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate a JSON value against a list of field specifications.
///
/// Returns all validation errors, not just the first one.
pub fn validate_fields(value: &Value, fields: &[FieldSpec]) -> ValidationResult {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            return Err(vec![ValidationError::type_mismatch(
                "$",
                FieldType::Object(fields.to_vec()),
                value,
            )]);
        }
    };

    let mut errors = Vec::new();

    for field in fields {
        match obj.get(&field.name) {
            Some(field_value) => {
                if let Err(e) = validate_value(field_value, &field.field_type, &field.name) {
                    errors.extend(e);
                }
            }
            None => {
                if field.required {
                    errors.push(ValidationError::missing_field(
                        &field.name,
                        field.field_type.clone(),
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a single value against a field type.
pub fn validate_value(value: &Value, field_type: &FieldType, field_name: &str) -> ValidationResult {
    let mut errors = Vec::new();

    match field_type {
        FieldType::String => {
            if !value.is_string() {
                errors.push(ValidationError::type_mismatch(
                    field_name,
                    FieldType::String,
                    value,
                ));
            }
        }
        FieldType::Integer => {
            let is_integer = value
                .as_number()
                .map(|n| n.is_i64() || n.is_u64())
                .unwrap_or(false);
            if !is_integer {
                errors.push(ValidationError::type_mismatch(
                    field_name,
                    FieldType::Integer,
                    value,
                ));
            }
        }
        FieldType::Float => {
            if !value.is_number() {
                errors.push(ValidationError::type_mismatch(
                    field_name,
                    FieldType::Float,
                    value,
                ));
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                errors.push(ValidationError::type_mismatch(
                    field_name,
                    FieldType::Boolean,
                    value,
                ));
            }
        }
        FieldType::List(inner) => {
            if let Some(arr) = value.as_array() {
                for (i, item) in arr.iter().enumerate() {
                    let item_path = format!("{}[{}]", field_name, i);
                    if let Err(e) = validate_value(item, inner, &item_path) {
                        errors.extend(e);
                    }
                }
            } else {
                errors.push(ValidationError::type_mismatch(
                    field_name,
                    field_type.clone(),
                    value,
                ));
            }
        }
        FieldType::Object(fields) => {
            if value.is_object() {
                if let Err(e) = validate_fields(value, fields) {
                    for err in e {
                        errors.push(err.with_path(field_name));
                    }
                }
            } else {
                errors.push(ValidationError::type_mismatch(
                    field_name,
                    field_type.clone(),
                    value,
                ));
            }
        }
        FieldType::Enum(allowed) => {
            if let Some(s) = value.as_str() {
                if !allowed.iter().any(|a| a == s) {
                    errors.push(ValidationError::enum_invalid(field_name, s, allowed.clone()));
                }
            } else {
                errors.push(ValidationError::type_mismatch(
                    field_name,
                    field_type.clone(),
                    value,
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Get a human-readable type name for a JSON value.
fn value_type_name(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer".to_string()
            } else {
                "number".to_string()
            }
        }
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

/// Truncate a string for preview purposes.
fn truncate_preview(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

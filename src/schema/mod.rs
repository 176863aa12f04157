//! Declared output schemas.
//!
//! The caller describes the shape it expects from the model as an ordered
//! list of [`FieldSpec`]s. From that single declaration the orchestrator
//! derives a strict JSON-Schema document for structured-output mode, a
//! human-readable hint block for JSON mode, and validation diagnostics for
//! parsed output.

mod extract;
mod types;
mod validation;

pub use extract::strip_code_fences;
pub use types::{FieldSpec, FieldType};
pub use validation::{validate_fields, validate_value, ValidationError, ValidationResult};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The caller's declared output shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Field specifications in declaration order
    pub fields: Vec<FieldSpec>,
}

impl OutputSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Convert to a strict JSON-Schema document.
    ///
    /// The root is a closed object: every object level carries
    /// `"additionalProperties": false` and the root type is never
    /// open-ended, as required by the remote API's strict mode.
    pub fn to_strict_schema(&self) -> Value {
        types::object_schema(&self.fields)
    }

    /// Render a human-readable hint block for JSON-mode prompts.
    ///
    /// Advisory only; the remote API does not enforce it.
    pub fn to_hint_block(&self) -> String {
        let mut block = String::from("Respond with a JSON object containing these fields:\n");
        for field in &self.fields {
            block.push_str("- ");
            block.push_str(&field.to_hint_line());
            block.push('\n');
        }
        block
    }

    /// Validate a parsed value against the declared fields.
    pub fn validate(&self, value: &Value) -> ValidationResult {
        validate_fields(value, &self.fields)
    }
}

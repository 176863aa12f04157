//! Error types for openrouter-structured.

use serde_json::Value;
use thiserror::Error;

use crate::schema::ValidationError;

/// Result type alias using this crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length of the response preview carried by `MalformedJson`.
const PREVIEW_CHARS: usize = 200;

/// Errors that can occur during a structured completion call.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing credential or otherwise invalid client setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Registry lookup for an unregistered model name
    #[error("Unknown model: {name}")]
    UnknownModel { name: String },

    /// Network-level failure (DNS, timeout, connection reset)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Non-2xx response from the remote API
    #[error("Remote API error ({code}): {message}")]
    RemoteApi {
        code: u16,
        message: String,
        metadata: Option<Value>,
    },

    /// HTTP success without usable content in the first choice
    #[error("Empty completion from model {model}")]
    EmptyCompletion { model: String },

    /// Model content that is not parseable JSON
    #[error("Malformed JSON in model output: {message}")]
    MalformedJson {
        message: String,
        response_preview: String,
    },

    /// Parsed JSON that does not match the declared schema
    #[error("Schema violation ({} issue(s)): {}", .violations.len(), render_violations(.violations))]
    SchemaViolation { violations: Vec<ValidationError> },
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an unknown-model error.
    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel { name: name.into() }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a remote API error.
    pub fn remote_api(code: u16, message: impl Into<String>, metadata: Option<Value>) -> Self {
        Self::RemoteApi {
            code,
            message: message.into(),
            metadata,
        }
    }

    /// Create an empty-completion error for the given model id.
    pub fn empty_completion(model: impl Into<String>) -> Self {
        Self::EmptyCompletion {
            model: model.into(),
        }
    }

    /// Create a malformed-JSON error, truncating the offending content
    /// to a short preview.
    pub fn malformed_json(message: impl Into<String>, content: &str) -> Self {
        let response_preview = if content.chars().count() > PREVIEW_CHARS {
            let truncated: String = content.chars().take(PREVIEW_CHARS).collect();
            format!("{truncated}...")
        } else {
            content.to_string()
        };
        Self::MalformedJson {
            message: message.into(),
            response_preview,
        }
    }

    /// Create a schema-violation error carrying validation diagnostics.
    pub fn schema_violation(violations: Vec<ValidationError>) -> Self {
        Self::SchemaViolation { violations }
    }

    /// Whether a caller-side retry is worth attempting.
    ///
    /// Transport failures and empty completions are transient more often
    /// than not; remote 429/5xx responses likewise. Configuration errors,
    /// unknown models, and parse/validation failures are not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::EmptyCompletion { .. } => true,
            Self::RemoteApi { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

fn render_violations(violations: &[ValidationError]) -> String {
    violations
        .iter()
        .map(|v| v.to_user_message())
        .collect::<Vec<_>>()
        .join("; ")
}

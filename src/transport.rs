//! Transport layer: the single network call to the completion endpoint.
//!
//! One POST per [`CompletionRequest`], normalized into either a content
//! string or a categorized error. No retries here; the call strategy's
//! tier fallback is the only built-in resilience.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::routing::ProviderPreferences;

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Response-format declaration for the outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Strict JSON-Schema mode; the remote enforces the schema.
    JsonSchema { json_schema: JsonSchemaFormat },
    /// Permissive JSON-object mode; syntactic JSON only.
    JsonObject,
}

/// Schema payload for strict structured-output mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: Value,
}

impl ResponseFormat {
    /// Strict JSON-Schema mode with the given schema name and document.
    pub fn json_schema(name: impl Into<String>, schema: Value) -> Self {
        Self::JsonSchema {
            json_schema: JsonSchemaFormat {
                name: name.into(),
                strict: true,
                schema,
            },
        }
    }

    /// Permissive JSON-object mode.
    pub fn json_object() -> Self {
        Self::JsonObject
    }
}

/// Outbound wire body for one completion attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    pub provider: ProviderPreferences,
    /// Fallback model ids, tried by the remote in order; omitted when empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

/// Token usage decoded from the response body when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The transport's success value.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Verbatim content of the first choice's message
    pub content: String,
    /// Model id that served the request (may differ from the requested one)
    pub model: String,
    /// Token usage, when the response carried it
    pub usage: Option<TokenUsage>,
    /// When the response was received
    pub timestamp: DateTime<Utc>,
}

/// Seam between the call strategy and the network.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Perform one completion round-trip.
    async fn send(&self, request: &CompletionRequest) -> Result<Completion>;
}

// OpenRouter response envelopes
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    model: Option<String>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: u16,
    message: String,
    metadata: Option<Value>,
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed macOS environments can panic during proxy auto-detection
    // in reqwest's default client builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client"),
    }
}

/// Production transport for the OpenRouter chat-completion endpoint.
pub struct OpenRouterTransport {
    config: ClientConfig,
    http: Client,
}

impl OpenRouterTransport {
    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);

        Self { config, http }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CompletionTransport for OpenRouterTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<Completion> {
        if self.config.api_key.trim().is_empty() {
            return Err(Error::configuration(format!(
                "{} is not set",
                crate::config::API_KEY_VAR
            )));
        }

        let url = self.endpoint();
        debug!(model = %request.model, %url, "sending completion request");

        let mut builder = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");
        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.title {
            builder = builder.header("X-Title", title);
        }

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.ok();

        if !status.is_success() {
            let body = body.unwrap_or_else(|| "<unreadable response body>".to_string());
            return Err(decode_error_body(status, &body));
        }

        let body = body.ok_or_else(|| Error::transport("failed to read response body"))?;
        decode_success_body(&request.model, &body)
    }
}

/// Decode an HTTP-success body into a completion.
///
/// A 2xx body without a non-empty first choice, or one that does not decode
/// at all, is `EmptyCompletion`: usually transient warm-up or scaling,
/// worth a caller-side retry.
fn decode_success_body(requested_model: &str, body: &str) -> Result<Completion> {
    let decoded: ChatCompletionResponse = match serde_json::from_str(body) {
        Ok(decoded) => decoded,
        Err(_) => return Err(Error::empty_completion(requested_model)),
    };

    let content = decoded
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_deref())
        .filter(|content| !content.is_empty());

    match content {
        Some(content) => Ok(Completion {
            content: content.to_string(),
            model: decoded
                .model
                .unwrap_or_else(|| requested_model.to_string()),
            usage: decoded.usage,
            timestamp: Utc::now(),
        }),
        None => Err(Error::empty_completion(requested_model)),
    }
}

/// Decode an HTTP-error body into a categorized remote error.
fn decode_error_body(status: StatusCode, body: &str) -> Error {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorResponse>(body) {
        return Error::remote_api(
            envelope.error.code,
            envelope.error.message,
            envelope.error.metadata,
        );
    }

    let status_text = status
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string();

    // JSON of another shape, or plain text: keep the body as diagnostics.
    let metadata = match serde_json::from_str::<Value>(body) {
        Ok(decoded) => decoded,
        Err(_) => Value::String(body.to_string()),
    };
    Error::remote_api(status.as_u16(), status_text, Some(metadata))
}

//! The call strategy: structured-output orchestration with model demotion.
//!
//! A call walks an explicit state machine: `ChooseMode` picks structured
//! mode when the primary model supports it, a schema was supplied, and the
//! caller did not force JSON mode. A failed structured attempt demotes the
//! first backup model to primary (when one exists) and falls back to
//! permissive JSON mode. JSON mode is the last tier; its failure is the
//! call's failure.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::registry::{ModelDescriptor, ModelRegistry};
use crate::routing::{build_routing_plan, RoutingPreferences};
use crate::schema::{strip_code_fences, OutputSchema};
use crate::transport::{
    ChatMessage, CompletionRequest, CompletionTransport, OpenRouterTransport, ResponseFormat,
    TokenUsage,
};

/// Schema name sent to the remote when the caller does not supply one.
pub const DEFAULT_SCHEMA_NAME: &str = "response";

const JSON_MODE_SYSTEM_PROMPT: &str = "You output a single raw JSON document. \
No prose, no explanations, no Markdown code fences.";

/// Public input to one orchestrated call.
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Optional system prompt; in JSON mode a strict-JSON instruction is
    /// used when absent
    pub system_prompt: Option<String>,
    /// The user prompt
    pub user_prompt: String,
    /// Symbolic registry name of the primary model
    pub primary_model: String,
    /// Symbolic registry names of backup models, in preference order
    pub backup_models: Vec<String>,
    /// Declared output schema; enables structured mode and the JSON-mode hint
    pub schema: Option<OutputSchema>,
    /// Schema name for the wire request; sanitized before sending
    pub schema_name: Option<String>,
    /// Skip structured mode even when the model and schema qualify
    pub force_json_mode: bool,
    /// Caller routing overrides, merged over the primary model's defaults
    pub routing: Option<RoutingPreferences>,
}

impl CallRequest {
    pub fn new(primary_model: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            user_prompt: user_prompt.into(),
            primary_model: primary_model.into(),
            backup_models: Vec::new(),
            schema: None,
            schema_name: None,
            force_json_mode: false,
            routing: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_backup_models(
        mut self,
        models: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.backup_models = models.into_iter().map(|m| m.into()).collect();
        self
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = Some(name.into());
        self
    }

    pub fn force_json_mode(mut self) -> Self {
        self.force_json_mode = true;
        self
    }

    pub fn with_routing(mut self, routing: RoutingPreferences) -> Self {
        self.routing = Some(routing);
        self
    }
}

/// Which tier produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Strict structured output; the value passed schema validation
    Structured,
    /// Permissive JSON mode; the value is parsed but never validated
    Json,
}

/// Success value of an orchestrated call.
///
/// With `CompletionMode::Json` the value is best-effort: syntactically
/// valid JSON, unvalidated against the caller's schema (the hint block is
/// advisory only). Callers needing shape guarantees in that mode must
/// validate themselves.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// The parsed (and, in structured mode, validated) value
    pub value: Value,
    /// Remote id of the model that served the request
    pub model: String,
    /// Which tier succeeded
    pub mode: CompletionMode,
    /// Token usage, when the response carried it
    pub usage: Option<TokenUsage>,
}

/// Tagged state of the call strategy.
enum CallPhase {
    ChooseMode,
    StructuredAttempt,
    JsonModeAttempt,
    Done(CallOutcome),
    Failed(Error),
}

/// The public call surface: registry + transport behind one entry point.
///
/// Holds no mutable state; safe to share across concurrent calls.
pub struct Orchestrator {
    registry: ModelRegistry,
    transport: Arc<dyn CompletionTransport>,
}

impl Orchestrator {
    /// Create an orchestrator with the default registry and the OpenRouter
    /// transport.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            registry: ModelRegistry::with_default_models(),
            transport: Arc::new(OpenRouterTransport::new(config)),
        }
    }

    /// Replace the model registry.
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Assemble from explicit parts; the seam used by tests and embedders
    /// with their own transport.
    pub fn from_parts(registry: ModelRegistry, transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Run one orchestrated call.
    ///
    /// At most two network round-trips: one structured attempt and one
    /// JSON-mode attempt.
    #[instrument(
        skip(self, request),
        fields(call_id = %Uuid::new_v4(), primary = %request.primary_model)
    )]
    pub async fn call(&self, request: CallRequest) -> Result<CallOutcome> {
        let start = Instant::now();

        // Resolve every model name before any schema work or network I/O.
        let mut primary = self.registry.lookup(&request.primary_model)?.clone();
        let mut backups: Vec<ModelDescriptor> = request
            .backup_models
            .iter()
            .map(|name| self.registry.lookup(name).cloned())
            .collect::<Result<_>>()?;

        // Strict conversion happens once per call, before network I/O.
        let strict_schema = request.schema.as_ref().map(|s| s.to_strict_schema());

        let mut phase = CallPhase::ChooseMode;
        loop {
            phase = match phase {
                CallPhase::ChooseMode => {
                    let structured = primary.supports_structured_output
                        && request.schema.is_some()
                        && !request.force_json_mode;
                    if structured {
                        CallPhase::StructuredAttempt
                    } else {
                        debug!(
                            supports_structured = primary.supports_structured_output,
                            has_schema = request.schema.is_some(),
                            forced = request.force_json_mode,
                            "skipping structured mode"
                        );
                        CallPhase::JsonModeAttempt
                    }
                }
                CallPhase::StructuredAttempt => {
                    let schema = request
                        .schema
                        .as_ref()
                        .ok_or_else(|| Error::configuration("structured attempt without schema"))?;
                    let strict = strict_schema
                        .as_ref()
                        .ok_or_else(|| Error::configuration("structured attempt without schema"))?;
                    match self
                        .structured_attempt(&request, &primary, &backups, schema, strict)
                        .await
                    {
                        Ok(outcome) => CallPhase::Done(outcome),
                        Err(err) => {
                            // Demotion: the failing model leaves the primary
                            // slot when a backup is available.
                            if let Some(next) = (!backups.is_empty()).then(|| backups.remove(0)) {
                                warn!(
                                    error = %err,
                                    demoted = %primary.id,
                                    promoted = %next.id,
                                    "structured attempt failed, demoting primary"
                                );
                                primary = next;
                            } else {
                                warn!(
                                    error = %err,
                                    model = %primary.id,
                                    "structured attempt failed, no backups left"
                                );
                            }
                            CallPhase::JsonModeAttempt
                        }
                    }
                }
                CallPhase::JsonModeAttempt => {
                    match self.json_mode_attempt(&request, &primary, &backups).await {
                        Ok(outcome) => CallPhase::Done(outcome),
                        Err(err) => CallPhase::Failed(err),
                    }
                }
                CallPhase::Done(outcome) => {
                    info!(
                        mode = ?outcome.mode,
                        model = %outcome.model,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "call completed"
                    );
                    return Ok(outcome);
                }
                CallPhase::Failed(err) => {
                    warn!(
                        error = %err,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "call failed after final tier"
                    );
                    return Err(err);
                }
            };
        }
    }

    async fn structured_attempt(
        &self,
        request: &CallRequest,
        primary: &ModelDescriptor,
        backups: &[ModelDescriptor],
        schema: &OutputSchema,
        strict_schema: &Value,
    ) -> Result<CallOutcome> {
        let plan = build_routing_plan(primary, backups, request.routing.as_ref());

        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(&request.user_prompt));

        let wire = CompletionRequest {
            model: primary.id.clone(),
            messages,
            response_format: Some(ResponseFormat::json_schema(
                sanitize_schema_name(request.schema_name.as_deref()),
                strict_schema.clone(),
            )),
            provider: plan.provider,
            models: plan.fallback_ids,
        };
        debug!(model = %wire.model, "structured attempt");

        let completion = self.transport.send(&wire).await?;

        let value: Value = serde_json::from_str(&completion.content)
            .map_err(|e| Error::malformed_json(e.to_string(), &completion.content))?;

        schema.validate(&value).map_err(Error::schema_violation)?;

        Ok(CallOutcome {
            value,
            model: completion.model,
            mode: CompletionMode::Structured,
            usage: completion.usage,
        })
    }

    async fn json_mode_attempt(
        &self,
        request: &CallRequest,
        primary: &ModelDescriptor,
        backups: &[ModelDescriptor],
    ) -> Result<CallOutcome> {
        let plan = build_routing_plan(primary, backups, request.routing.as_ref());

        let system = request
            .system_prompt
            .clone()
            .unwrap_or_else(|| JSON_MODE_SYSTEM_PROMPT.to_string());

        // The schema hint is advisory; the remote enforces syntax only.
        let user = match &request.schema {
            Some(schema) => format!("{}\n\n{}", request.user_prompt, schema.to_hint_block()),
            None => request.user_prompt.clone(),
        };

        let wire = CompletionRequest {
            model: primary.id.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            response_format: Some(ResponseFormat::json_object()),
            provider: plan.provider,
            models: plan.fallback_ids,
        };
        debug!(model = %wire.model, "JSON-mode attempt");

        let completion = self.transport.send(&wire).await?;

        let stripped = strip_code_fences(&completion.content);
        let value: Value = serde_json::from_str(stripped)
            .map_err(|e| Error::malformed_json(e.to_string(), &completion.content))?;

        Ok(CallOutcome {
            value,
            model: completion.model,
            mode: CompletionMode::Json,
            usage: completion.usage,
        })
    }
}

/// Sanitize a schema name to the wire-safe charset `[A-Za-z0-9_-]`.
///
/// Falls back to [`DEFAULT_SCHEMA_NAME`] when absent or empty.
fn sanitize_schema_name(name: Option<&str>) -> String {
    static CHARSET: OnceLock<Regex> = OnceLock::new();
    let charset = CHARSET.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid regex"));

    match name {
        Some(raw) if !raw.is_empty() => charset.replace_all(raw, "_").into_owned(),
        _ => DEFAULT_SCHEMA_NAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelDescriptor;
    use crate::routing::ProviderSort;
    use crate::schema::{FieldSpec, FieldType};
    use crate::transport::Completion;
    use async_trait::async_trait;
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory transport returning scripted results and recording the
    /// requests it receives.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Completion>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: impl IntoIterator<Item = Result<Completion>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn send(&self, request: &CompletionRequest) -> Result<Completion> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::transport("script exhausted")))
        }
    }

    fn completion(content: &str) -> Result<Completion> {
        Ok(Completion {
            content: content.to_string(),
            model: "test/served".to_string(),
            usage: None,
            timestamp: Utc::now(),
        })
    }

    fn test_registry() -> ModelRegistry {
        ModelRegistry::from_descriptors([
            (
                "structured",
                ModelDescriptor::new("acme/structured-1").with_structured_output(),
            ),
            (
                "structured-alt",
                ModelDescriptor::new("acme/structured-2").with_structured_output(),
            ),
            ("plain", ModelDescriptor::new("acme/plain-1")),
        ])
    }

    fn answer_schema() -> OutputSchema {
        OutputSchema::default()
            .with_field(FieldSpec::new("answer", FieldType::String))
            .with_field(FieldSpec::new("confidence", FieldType::Float).optional())
    }

    fn orchestrator(
        transport: &Arc<ScriptedTransport>,
    ) -> Orchestrator {
        Orchestrator::from_parts(test_registry(), transport.clone() as Arc<dyn CompletionTransport>)
    }

    #[tokio::test]
    async fn test_structured_success() {
        let transport = ScriptedTransport::new([completion(r#"{"answer":"42"}"#)]);
        let outcome = orchestrator(&transport)
            .call(CallRequest::new("structured", "question").with_schema(answer_schema()))
            .await
            .unwrap();

        assert_eq!(outcome.mode, CompletionMode::Structured);
        assert_eq!(outcome.value, json!({"answer": "42"}));
        assert_eq!(outcome.model, "test/served");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let format = serde_json::to_value(requests[0].response_format.as_ref().unwrap()).unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["strict"], json!(true));
        assert_eq!(
            format["json_schema"]["schema"]["additionalProperties"],
            json!(false)
        );
    }

    #[tokio::test]
    async fn test_unsupported_model_never_attempts_structured() {
        let transport = ScriptedTransport::new([completion(r#"{"answer":"x"}"#)]);
        let outcome = orchestrator(&transport)
            .call(CallRequest::new("plain", "question").with_schema(answer_schema()))
            .await
            .unwrap();

        assert_eq!(outcome.mode, CompletionMode::Json);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let format = serde_json::to_value(requests[0].response_format.as_ref().unwrap()).unwrap();
        assert_eq!(format, json!({"type": "json_object"}));
    }

    #[tokio::test]
    async fn test_force_json_mode_skips_structured() {
        let transport = ScriptedTransport::new([completion(r#"{"answer":"x"}"#)]);
        let outcome = orchestrator(&transport)
            .call(
                CallRequest::new("structured", "question")
                    .with_schema(answer_schema())
                    .force_json_mode(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.mode, CompletionMode::Json);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_no_schema_goes_straight_to_json_mode() {
        let transport = ScriptedTransport::new([completion(r#"{"free":"form"}"#)]);
        let outcome = orchestrator(&transport)
            .call(CallRequest::new("plain", "question"))
            .await
            .unwrap();

        assert_eq!(outcome.mode, CompletionMode::Json);
        assert_eq!(outcome.value, json!({"free": "form"}));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        // Default strict-JSON system prompt, untouched user prompt.
        assert_eq!(requests[0].messages[0].content, JSON_MODE_SYSTEM_PROMPT);
        assert_eq!(requests[0].messages[1].content, "question");
    }

    #[tokio::test]
    async fn test_demotion_promotes_first_backup() {
        let transport = ScriptedTransport::new([
            Err(Error::remote_api(500, "provider exploded", None)),
            completion(r#"{"answer":"rescued"}"#),
        ]);
        let outcome = orchestrator(&transport)
            .call(
                CallRequest::new("structured", "question")
                    .with_backup_models(["structured-alt", "plain"])
                    .with_schema(answer_schema()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.mode, CompletionMode::Json);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        // Structured attempt: original primary, both backups on the wire.
        assert_eq!(requests[0].model, "acme/structured-1");
        assert_eq!(requests[0].models, vec!["acme/structured-2", "acme/plain-1"]);
        // JSON attempt: first backup promoted and gone from the wire list.
        assert_eq!(requests[1].model, "acme/structured-2");
        assert_eq!(requests[1].models, vec!["acme/plain-1"]);
    }

    #[tokio::test]
    async fn test_validation_failure_without_backups_reuses_primary() {
        let transport = ScriptedTransport::new([
            completion(r#"{"wrong_field": true}"#),
            completion(r#"{"answer":"second try"}"#),
        ]);
        let outcome = orchestrator(&transport)
            .call(CallRequest::new("structured", "question").with_schema(answer_schema()))
            .await
            .unwrap();

        assert_eq!(outcome.mode, CompletionMode::Json);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].model, "acme/structured-1");
        assert_eq!(requests[1].model, "acme/structured-1");
        assert!(requests[1].models.is_empty());
    }

    #[tokio::test]
    async fn test_json_mode_appends_schema_hint() {
        let transport = ScriptedTransport::new([completion(r#"{"answer":"x"}"#)]);
        orchestrator(&transport)
            .call(CallRequest::new("plain", "question").with_schema(answer_schema()))
            .await
            .unwrap();

        let requests = transport.requests();
        let user = &requests[0].messages[1].content;
        assert!(user.starts_with("question"));
        assert!(user.contains("answer (string)"));
        assert!(user.contains("confidence (number) (optional)"));
    }

    #[tokio::test]
    async fn test_caller_system_prompt_wins_in_json_mode() {
        let transport = ScriptedTransport::new([completion(r#"{"a":1}"#)]);
        orchestrator(&transport)
            .call(
                CallRequest::new("plain", "question")
                    .with_system_prompt("You are a terse auditor."),
            )
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].messages[0].content, "You are a terse auditor.");
    }

    #[tokio::test]
    async fn test_json_mode_strips_fences() {
        let transport = ScriptedTransport::new([completion("```json\n{\"a\":1}\n```")]);
        let outcome = orchestrator(&transport)
            .call(CallRequest::new("plain", "question"))
            .await
            .unwrap();

        assert_eq!(outcome.value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_json_mode_parse_failure_is_terminal() {
        let transport = ScriptedTransport::new([completion("definitely not json")]);
        let err = orchestrator(&transport)
            .call(CallRequest::new("plain", "question"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedJson { .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_structured_failure_then_json_failure_surfaces_last_error() {
        let transport = ScriptedTransport::new([
            completion("not json"),
            Err(Error::remote_api(429, "rate limited", None)),
        ]);
        let err = orchestrator(&transport)
            .call(CallRequest::new("structured", "question").with_schema(answer_schema()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RemoteApi { code: 429, .. }));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_any_call() {
        let transport = ScriptedTransport::new([completion(r#"{"a":1}"#)]);
        let err = orchestrator(&transport)
            .call(CallRequest::new("no-such-model", "question"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownModel { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_backup_fails_before_any_call() {
        let transport = ScriptedTransport::new([completion(r#"{"a":1}"#)]);
        let err = orchestrator(&transport)
            .call(
                CallRequest::new("structured", "question")
                    .with_backup_models(["no-such-model"])
                    .with_schema(answer_schema()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownModel { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_routing_override_reaches_the_wire() {
        let transport = ScriptedTransport::new([completion(r#"{"a":1}"#)]);
        orchestrator(&transport)
            .call(
                CallRequest::new("plain", "question")
                    .with_routing(RoutingPreferences::new().with_sort(ProviderSort::Latency)),
            )
            .await
            .unwrap();

        let requests = transport.requests();
        assert!(requests[0].provider.require_parameters);
        assert_eq!(requests[0].provider.sort, Some(ProviderSort::Latency));
    }

    #[tokio::test]
    async fn test_schema_name_on_the_wire() {
        let transport = ScriptedTransport::new([completion(r#"{"answer":"x"}"#)]);
        orchestrator(&transport)
            .call(
                CallRequest::new("structured", "question")
                    .with_schema(answer_schema())
                    .with_schema_name("my review.v2"),
            )
            .await
            .unwrap();

        let requests = transport.requests();
        let format = serde_json::to_value(requests[0].response_format.as_ref().unwrap()).unwrap();
        assert_eq!(format["json_schema"]["name"], "my_review_v2");
    }

    #[test]
    fn test_sanitize_schema_name() {
        assert_eq!(sanitize_schema_name(None), DEFAULT_SCHEMA_NAME);
        assert_eq!(sanitize_schema_name(Some("")), DEFAULT_SCHEMA_NAME);
        assert_eq!(sanitize_schema_name(Some("review-v2")), "review-v2");
        assert_eq!(sanitize_schema_name(Some("my review.v2")), "my_review_v2");
    }

    proptest! {
        #[test]
        fn prop_sanitized_names_stay_wire_safe(raw in ".*") {
            let name = sanitize_schema_name(Some(&raw));
            prop_assert!(!name.is_empty());
            prop_assert!(name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        }
    }
}

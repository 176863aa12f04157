//! # openrouter-structured
//!
//! Structured-output call orchestration for the OpenRouter chat-completion
//! API: schema-constrained decoding, multi-tier fallback (structured mode,
//! then permissive JSON mode with model demotion), and response validation.
//!
//! ## Core Components
//!
//! - **Registry**: fixed mapping from symbolic model name to capabilities
//! - **Routing**: merges caller overrides with model defaults into provider
//!   preferences
//! - **Transport**: the single network round-trip, normalized into a content
//!   string or a categorized error
//! - **Orchestrator**: the call strategy choosing structured vs JSON mode
//!   and demoting the primary model on structured failure
//! - **Schema**: declared output shapes, strict JSON-Schema conversion, and
//!   validation diagnostics
//!
//! ## Example
//!
//! ```rust,ignore
//! use openrouter_structured::{
//!     CallRequest, ClientConfig, FieldSpec, FieldType, Orchestrator, OutputSchema,
//! };
//!
//! let orchestrator = Orchestrator::new(ClientConfig::from_env());
//!
//! let schema = OutputSchema::default()
//!     .with_field(FieldSpec::new("summary", FieldType::String))
//!     .with_field(FieldSpec::new("severity", FieldType::enum_of(["low", "high"])));
//!
//! let outcome = orchestrator
//!     .call(
//!         CallRequest::new("gpt-4o", "Review this change: ...")
//!             .with_backup_models(["gemini-flash"])
//!             .with_schema(schema),
//!     )
//!     .await?;
//!
//! println!("{} via {:?}: {}", outcome.model, outcome.mode, outcome.value);
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod routing;
pub mod schema;
pub mod transport;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use orchestrator::{CallOutcome, CallRequest, CompletionMode, Orchestrator};
pub use registry::{ModelDescriptor, ModelRegistry};
pub use routing::{
    build_routing_plan, ProviderPreferences, ProviderSort, RoutingPlan, RoutingPreferences,
};
pub use schema::{
    strip_code_fences, FieldSpec, FieldType, OutputSchema, ValidationError,
};
pub use transport::{
    ChatMessage, ChatRole, Completion, CompletionRequest, CompletionTransport,
    OpenRouterTransport, ResponseFormat, TokenUsage,
};

//! Model registry: fixed mapping from symbolic name to model descriptor.
//!
//! The registry is populated once at construction and never mutated. Adding
//! a model means appending one descriptor entry to
//! [`ModelRegistry::with_default_models`]; no other code changes are needed.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::routing::{ProviderSort, RoutingPreferences};

/// Capability flags and default routing for one remote model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Remote model identifier (e.g. "openai/gpt-4o")
    pub id: String,
    /// Whether the model honors strict JSON-Schema structured output
    pub supports_structured_output: bool,
    /// Default routing preferences, merged under caller overrides
    pub default_routing: Option<RoutingPreferences>,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        debug_assert!(!id.is_empty(), "model id must not be empty");
        Self {
            id,
            supports_structured_output: false,
            default_routing: None,
        }
    }

    pub fn with_structured_output(mut self) -> Self {
        self.supports_structured_output = true;
        self
    }

    pub fn with_default_routing(mut self, routing: RoutingPreferences) -> Self {
        self.default_routing = Some(routing);
        self
    }
}

/// Immutable mapping from symbolic model name to descriptor.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Build the curated default registry.
    pub fn with_default_models() -> Self {
        Self::from_descriptors([
            (
                "gpt-4o",
                ModelDescriptor::new("openai/gpt-4o").with_structured_output(),
            ),
            (
                "gpt-4o-mini",
                ModelDescriptor::new("openai/gpt-4o-mini")
                    .with_structured_output()
                    .with_default_routing(
                        RoutingPreferences::new().with_sort(ProviderSort::Price),
                    ),
            ),
            (
                "claude-sonnet",
                ModelDescriptor::new("anthropic/claude-3.5-sonnet"),
            ),
            (
                "claude-haiku",
                ModelDescriptor::new("anthropic/claude-3.5-haiku").with_default_routing(
                    RoutingPreferences::new().with_sort(ProviderSort::Latency),
                ),
            ),
            (
                "gemini-flash",
                ModelDescriptor::new("google/gemini-2.0-flash-001")
                    .with_structured_output()
                    .with_default_routing(
                        RoutingPreferences::new()
                            .with_order(["google-vertex", "google-ai-studio"]),
                    ),
            ),
            (
                "llama-70b",
                ModelDescriptor::new("meta-llama/llama-3.1-70b-instruct").with_default_routing(
                    RoutingPreferences::new()
                        .with_sort(ProviderSort::Throughput)
                        .with_ignore(["deepinfra"]),
                ),
            ),
            (
                "mistral-small",
                ModelDescriptor::new("mistralai/mistral-small-3.1-24b-instruct"),
            ),
        ])
    }

    /// Build a registry from explicit (name, descriptor) pairs.
    pub fn from_descriptors<N: Into<String>>(
        entries: impl IntoIterator<Item = (N, ModelDescriptor)>,
    ) -> Self {
        Self {
            models: entries
                .into_iter()
                .map(|(name, descriptor)| (name.into(), descriptor))
                .collect(),
        }
    }

    /// Look up a descriptor by symbolic name.
    pub fn lookup(&self, name: &str) -> Result<&ModelDescriptor> {
        self.models
            .get(name)
            .ok_or_else(|| Error::unknown_model(name))
    }

    /// Iterate over the registered symbolic names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_default_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = ModelDescriptor::new("openai/gpt-4o")
            .with_structured_output()
            .with_default_routing(RoutingPreferences::new().with_sort(ProviderSort::Price));

        assert_eq!(descriptor.id, "openai/gpt-4o");
        assert!(descriptor.supports_structured_output);
        assert_eq!(
            descriptor.default_routing.unwrap().sort,
            Some(ProviderSort::Price)
        );
    }

    #[test]
    fn test_default_registry_lookup() {
        let registry = ModelRegistry::with_default_models();

        let gpt = registry.lookup("gpt-4o").unwrap();
        assert_eq!(gpt.id, "openai/gpt-4o");
        assert!(gpt.supports_structured_output);

        let llama = registry.lookup("llama-70b").unwrap();
        assert!(!llama.supports_structured_output);
        assert!(llama.default_routing.is_some());
    }

    #[test]
    fn test_unknown_model() {
        let registry = ModelRegistry::with_default_models();
        let err = registry.lookup("no-such-model").unwrap_err();

        assert!(matches!(err, Error::UnknownModel { ref name } if name == "no-such-model"));
    }

    #[test]
    fn test_ids_unique_and_nonempty() {
        let registry = ModelRegistry::with_default_models();
        let mut ids: Vec<&str> = registry
            .names()
            .map(|name| registry.lookup(name).unwrap().id.as_str())
            .collect();

        assert!(ids.iter().all(|id| !id.is_empty()));
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[test]
    fn test_custom_registry() {
        let registry = ModelRegistry::from_descriptors([(
            "tiny",
            ModelDescriptor::new("acme/tiny-1b"),
        )]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("tiny").unwrap().id, "acme/tiny-1b");
        assert!(registry.lookup("gpt-4o").is_err());
    }
}

//! Provider routing preferences and the routing policy builder.
//!
//! Merges caller-supplied routing overrides with a model's defaults into
//! the wire-ready provider-preference object plus the ordered fallback-model
//! list. Field-by-field precedence: override wins, else model default, else
//! the field is omitted from the serialized request entirely.

use serde::{Deserialize, Serialize};

use crate::registry::ModelDescriptor;

/// Sorting criterion for provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSort {
    Price,
    Throughput,
    Latency,
}

/// Routing preference value object.
///
/// Used both as a model's default routing and as a caller override; the two
/// share the shape and merge per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingPreferences {
    /// Sort criterion for provider selection
    pub sort: Option<ProviderSort>,
    /// Explicit provider order, tried first to last
    pub order: Option<Vec<String>>,
    /// Providers to exclude from routing
    pub ignore: Option<Vec<String>>,
}

impl RoutingPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort(mut self, sort: ProviderSort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_order(mut self, order: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.order = Some(order.into_iter().map(|p| p.into()).collect());
        self
    }

    pub fn with_ignore(mut self, ignore: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignore = Some(ignore.into_iter().map(|p| p.into()).collect());
        self
    }
}

/// Wire-ready provider preference object.
///
/// `require_parameters` is always true so the remote API only routes to
/// providers that support the requested parameters (forced JSON schema
/// included). Absent optional fields are omitted from the serialized JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPreferences {
    pub require_parameters: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<ProviderSort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
}

/// Output of the routing policy builder.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPlan {
    /// Provider preferences for the outbound request
    pub provider: ProviderPreferences,
    /// Remote ids of the backup models, in order
    pub fallback_ids: Vec<String>,
}

/// Build the routing plan for one completion attempt.
///
/// Pure function over already-validated inputs; no error conditions.
pub fn build_routing_plan(
    primary: &ModelDescriptor,
    backups: &[ModelDescriptor],
    overrides: Option<&RoutingPreferences>,
) -> RoutingPlan {
    let defaults = primary.default_routing.as_ref();

    let provider = ProviderPreferences {
        require_parameters: true,
        sort: overrides
            .and_then(|o| o.sort)
            .or_else(|| defaults.and_then(|d| d.sort)),
        order: overrides
            .and_then(|o| o.order.clone())
            .or_else(|| defaults.and_then(|d| d.order.clone())),
        ignore: overrides
            .and_then(|o| o.ignore.clone())
            .or_else(|| defaults.and_then(|d| d.ignore.clone())),
    };

    let fallback_ids = backups.iter().map(|m| m.id.clone()).collect();

    RoutingPlan {
        provider,
        fallback_ids,
    }
}

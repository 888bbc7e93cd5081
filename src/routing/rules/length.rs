//! Length-based routing rule.

use tracing::debug;

use crate::error::Result;
use crate::routing::types::{ModelTier, Query, RoutingDecision};

use super::RoutingRule;

/// Routes on character count: short queries go to the small tier, long
/// ones climb the cost ladder.
#[derive(Debug, Clone)]
pub struct LengthBasedRule {
    /// Maximum chars for the small tier
    pub small_threshold: usize,
    /// Maximum chars for the medium tier (above goes large)
    pub medium_threshold: usize,
    pub priority: i32,
    pub enabled: bool,
}

impl Default for LengthBasedRule {
    fn default() -> Self {
        Self {
            small_threshold: 500,
            medium_threshold: 2000,
            priority: 10,
            enabled: true,
        }
    }
}

impl LengthBasedRule {
    pub fn new(small_threshold: usize, medium_threshold: usize) -> Self {
        Self {
            small_threshold,
            medium_threshold,
            ..Self::default()
        }
    }
}

impl RoutingRule for LengthBasedRule {
    fn name(&self) -> &'static str {
        "length_based"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn evaluate(&self, query: &Query) -> Result<Option<RoutingDecision>> {
        let length = query.length_chars();

        let (model, reason, confidence) = if length <= self.small_threshold {
            (
                ModelTier::Small,
                format!("Short query ({} chars) suited to the small tier", length),
                0.9,
            )
        } else if length <= self.medium_threshold {
            (
                ModelTier::Medium,
                format!("Medium query ({} chars) suited to the medium tier", length),
                0.85,
            )
        } else {
            (
                ModelTier::Large,
                format!("Long query ({} chars) requires the large tier", length),
                0.8,
            )
        };

        debug!(length, model = %model, "length rule");

        Ok(Some(
            RoutingDecision::new(model, reason, confidence)
                .with_rule(self.name())
                .with_metadata("query_length", serde_json::json!(length))
                .with_metadata("small_threshold", serde_json::json!(self.small_threshold))
                .with_metadata("medium_threshold", serde_json::json!(self.medium_threshold)),
        ))
    }
}

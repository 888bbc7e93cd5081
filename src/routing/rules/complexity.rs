//! Complexity-based routing rule.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::Result;
use crate::routing::types::{ModelTier, Query, RoutingDecision};

use super::RoutingRule;

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w+\b").expect("valid word pattern"))
}

fn default_set(words: &[&str]) -> HashSet<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Routes on complexity indicators in the query wording.
///
/// Any complex keyword forces the large tier; otherwise moderate and
/// simple indicator counts are weighed against each other. Queries with
/// fenced code blocks or large token estimates are upgraded off the small
/// tier.
#[derive(Debug, Clone)]
pub struct ComplexityBasedRule {
    pub simple_indicators: HashSet<String>,
    pub moderate_indicators: HashSet<String>,
    pub complex_indicators: HashSet<String>,
    pub priority: i32,
    pub enabled: bool,
}

impl Default for ComplexityBasedRule {
    fn default() -> Self {
        Self {
            simple_indicators: default_set(&[
                "what", "when", "where", "who", "list", "show", "find", "search", "get", "fetch",
                "display", "print", "count", "check",
            ]),
            moderate_indicators: default_set(&[
                "explain", "describe", "summarize", "compare", "why", "how", "implement",
                "create", "build", "fix", "update", "modify",
            ]),
            complex_indicators: default_set(&[
                "analyze", "design", "architect", "optimize", "refactor", "debug", "review",
                "audit", "improve", "enhance", "restructure", "evaluate", "integrate", "migrate",
                "transform", "performance", "security",
            ]),
            priority: 20,
            enabled: true,
        }
    }
}

impl ComplexityBasedRule {
    fn extract_keywords(text: &str) -> HashSet<String> {
        let lowered = text.to_lowercase();
        word_pattern()
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Classify the query wording, returning (level, confidence).
    fn calculate_complexity(&self, query: &Query) -> (&'static str, f64) {
        let keywords = Self::extract_keywords(&query.text);

        let simple_hits = keywords.intersection(&self.simple_indicators).count();
        let moderate_hits = keywords.intersection(&self.moderate_indicators).count();
        let complex_hits = keywords.intersection(&self.complex_indicators).count();

        if complex_hits > 0 {
            ("complex", (0.7 + 0.1 * complex_hits as f64).min(0.9))
        } else if moderate_hits > simple_hits {
            ("moderate", (0.6 + 0.1 * moderate_hits as f64).min(0.85))
        } else if simple_hits > 0 {
            ("simple", (0.7 + 0.1 * simple_hits as f64).min(0.9))
        } else {
            ("moderate", 0.5)
        }
    }
}

impl RoutingRule for ComplexityBasedRule {
    fn name(&self) -> &'static str {
        "complexity_based"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn evaluate(&self, query: &Query) -> Result<Option<RoutingDecision>> {
        let (complexity, mut confidence) = self.calculate_complexity(query);

        let (mut model, mut reason) = match complexity {
            "simple" => (
                ModelTier::Small,
                "Simple query with basic information retrieval".to_string(),
            ),
            "complex" => (
                ModelTier::Large,
                "Complex query requiring analysis or design".to_string(),
            ),
            _ => (
                ModelTier::Medium,
                "Moderate complexity requiring explanation or implementation".to_string(),
            ),
        };

        // Code blocks and large prompts are inherently harder than their
        // wording suggests
        if query.text.contains("```") || query.estimated_tokens() > 500 {
            if model == ModelTier::Small {
                model = ModelTier::Medium;
                reason.push_str(" (contains code)");
                confidence *= 0.9;
            }
        }

        debug!(complexity, model = %model, "complexity rule");

        let mut found: Vec<String> = Self::extract_keywords(&query.text)
            .into_iter()
            .filter(|w| {
                self.simple_indicators.contains(w)
                    || self.moderate_indicators.contains(w)
                    || self.complex_indicators.contains(w)
            })
            .collect();
        found.sort_unstable();

        Ok(Some(
            RoutingDecision::new(model, reason, confidence)
                .with_rule(self.name())
                .with_metadata("complexity_level", serde_json::json!(complexity))
                .with_metadata("indicators_found", serde_json::json!(found)),
        ))
    }
}

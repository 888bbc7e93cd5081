//! Core types for routing: model tiers, queries, decisions, and metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::Error;

/// Model tier, ordered by cost (cheapest first).
///
/// The tier set is closed: every routable model belongs to exactly one of
/// these three classes. Pricing and identifier strings live in the pricing
/// table, keyed by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Fast and cheap (e.g., Claude Haiku)
    Small = 0,
    /// Balanced capability and cost (e.g., Claude Sonnet)
    Medium = 1,
    /// Most capable, highest cost (e.g., Claude Opus)
    Large = 2,
}

impl ModelTier {
    /// All tiers, cheapest first.
    pub const ALL: [ModelTier; 3] = [ModelTier::Small, ModelTier::Medium, ModelTier::Large];

    /// Index into per-tier arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Capitalised name for user-facing messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Small => "Small",
            Self::Medium => "Medium",
            Self::Large => "Large",
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "small" | "haiku" => Ok(Self::Small),
            "medium" | "sonnet" => Ok(Self::Medium),
            "large" | "opus" => Ok(Self::Large),
            other => Err(Error::UnknownModel(other.to_string())),
        }
    }
}

/// A query to be routed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// The prompt text
    pub text: String,
    /// Originating tool name, if the query arrived through the tool surface
    pub tool_name: Option<String>,
    /// Free-form context used for cache compatibility matching
    pub context: Option<HashMap<String, serde_json::Value>>,
    /// Explicit model preference from the caller
    pub preferred_model: Option<ModelTier>,
    /// Additional metadata for tracking
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_name: None,
            context: None,
            preferred_model: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_preferred_model(mut self, model: ModelTier) -> Self {
        self.preferred_model = Some(model);
        self
    }

    /// Query length in characters.
    pub fn length_chars(&self) -> usize {
        self.text.chars().count()
    }

    /// Rough token estimate (1 token per 4 characters).
    pub fn estimated_tokens(&self) -> usize {
        self.length_chars() / 4
    }
}

/// Result of evaluating the rule stack for a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Selected model tier
    pub model: ModelTier,
    /// Human-readable reasoning
    pub reason: String,
    /// Confidence in the decision (0.0 to 1.0)
    pub confidence: f64,
    /// Names of the rules that produced this decision, in order
    pub rules_applied: Vec<String>,
    /// Rule-specific metadata (thresholds, matched indicators, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RoutingDecision {
    pub fn new(model: ModelTier, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            model,
            reason: reason.into(),
            confidence: confidence.clamp(0.0, 1.0),
            rules_applied: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, rule_name: impl Into<String>) -> Self {
        self.rules_applied.push(rule_name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Where a model override originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideSource {
    /// `Query::preferred_model` was set
    Explicit,
    /// An `@small`/`@medium`/`@large` token in the query text
    Inline,
    /// An active session-level escalation
    Session,
    /// No override applied
    None,
}

impl std::fmt::Display for OverrideSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Inline => write!(f, "inline"),
            Self::Session => write!(f, "session"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Final model selection, with override tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    /// The model that will serve the query
    pub model: ModelTier,
    /// The rule-stack decision, absent when an override applied
    pub routing_decision: Option<RoutingDecision>,
    /// Whether an override bypassed the rule stack
    pub overridden: bool,
    /// Source of the override
    pub override_source: OverrideSource,
    /// Reason attached to the override
    pub override_reason: Option<String>,
    /// When the selection was made
    pub timestamp: DateTime<Utc>,
}

impl ModelSelection {
    /// Selection produced by the rule stack (or default fallback).
    pub fn routed(model: ModelTier, decision: Option<RoutingDecision>) -> Self {
        Self {
            model,
            routing_decision: decision,
            overridden: false,
            override_source: OverrideSource::None,
            override_reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Selection forced by an override.
    pub fn overridden(model: ModelTier, source: OverrideSource, reason: impl Into<String>) -> Self {
        Self {
            model,
            routing_decision: None,
            overridden: true,
            override_source: source,
            override_reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time view of routing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingMetricsSnapshot {
    pub total_queries: u64,
    pub override_count: u64,
    /// Decision counts per tier
    pub model_distribution: HashMap<ModelTier, u64>,
    /// Decision share per tier, in percent
    pub distribution_percentages: HashMap<ModelTier, f64>,
    pub average_confidence: f64,
    pub rule_hit_counts: HashMap<String, u64>,
}

/// Metrics accumulator for routing decisions.
///
/// Counters use atomic arithmetic so concurrent queries never contend on a
/// lock; only the name-keyed rule-hit map takes one.
#[derive(Debug, Default)]
pub struct RoutingMetrics {
    total_queries: AtomicU64,
    override_count: AtomicU64,
    distribution: [AtomicU64; 3],
    /// Sum of decision confidences in micro-units (1e-6)
    confidence_sum_micros: AtomicU64,
    confidence_samples: AtomicU64,
    rule_hits: Mutex<HashMap<String, u64>>,
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a routing decision.
    pub fn record(&self, selection: &ModelSelection) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.distribution[selection.model.index()].fetch_add(1, Ordering::Relaxed);

        if selection.overridden {
            self.override_count.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(decision) = &selection.routing_decision {
            let micros = (decision.confidence.clamp(0.0, 1.0) * 1_000_000.0) as u64;
            self.confidence_sum_micros.fetch_add(micros, Ordering::Relaxed);
            self.confidence_samples.fetch_add(1, Ordering::Relaxed);

            let mut hits = self.rule_hits.lock().expect("rule hit map poisoned");
            for rule in &decision.rules_applied {
                *hits.entry(rule.clone()).or_insert(0) += 1;
            }
        }
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough snapshot for reporting.
    pub fn snapshot(&self) -> RoutingMetricsSnapshot {
        let total = self.total_queries.load(Ordering::Relaxed);
        let samples = self.confidence_samples.load(Ordering::Relaxed);

        let mut model_distribution = HashMap::new();
        let mut distribution_percentages = HashMap::new();
        for tier in ModelTier::ALL {
            let count = self.distribution[tier.index()].load(Ordering::Relaxed);
            if count > 0 {
                model_distribution.insert(tier, count);
                if total > 0 {
                    distribution_percentages.insert(tier, (count as f64 / total as f64) * 100.0);
                }
            }
        }

        let average_confidence = if samples > 0 {
            self.confidence_sum_micros.load(Ordering::Relaxed) as f64
                / 1_000_000.0
                / samples as f64
        } else {
            0.0
        };

        RoutingMetricsSnapshot {
            total_queries: total,
            override_count: self.override_count.load(Ordering::Relaxed),
            model_distribution,
            distribution_percentages,
            average_confidence,
            rule_hit_counts: self.rule_hits.lock().expect("rule hit map poisoned").clone(),
        }
    }
}

//! Pricing and usage-accounting types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::routing::types::ModelTier;

/// Pricing and limits for one model tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Tier this pricing belongs to
    pub tier: ModelTier,
    /// Stable model identifier (e.g., "claude-3-5-sonnet-20241022")
    pub model_id: String,
    /// Input cost per million tokens (USD)
    pub input_cost_per_1m: f64,
    /// Output cost per million tokens (USD)
    pub output_cost_per_1m: f64,
    /// Maximum context window (tokens)
    pub context_window: u32,
    /// Maximum output tokens
    pub max_output_tokens: u32,
}

impl ModelPricing {
    /// Calculate cost for given token usage.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_1m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_1m;
        input_cost + output_cost
    }
}

/// Pricing table for the closed tier set.
///
/// This is the single source of truth for model identity and price; the
/// relative cost factor is derived from it rather than stored separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    tiers: [ModelPricing; 3],
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            tiers: [
                ModelPricing {
                    tier: ModelTier::Small,
                    model_id: "claude-3-haiku-20240307".to_string(),
                    input_cost_per_1m: 0.25,
                    output_cost_per_1m: 1.25,
                    context_window: 200_000,
                    max_output_tokens: 4096,
                },
                ModelPricing {
                    tier: ModelTier::Medium,
                    model_id: "claude-3-5-sonnet-20241022".to_string(),
                    input_cost_per_1m: 3.00,
                    output_cost_per_1m: 15.00,
                    context_window: 200_000,
                    max_output_tokens: 8192,
                },
                ModelPricing {
                    tier: ModelTier::Large,
                    model_id: "claude-3-opus-20240229".to_string(),
                    input_cost_per_1m: 15.00,
                    output_cost_per_1m: 75.00,
                    context_window: 200_000,
                    max_output_tokens: 4096,
                },
            ],
        }
    }
}

impl PricingTable {
    /// Build a table from explicit per-tier pricing.
    pub fn new(small: ModelPricing, medium: ModelPricing, large: ModelPricing) -> Self {
        Self {
            tiers: [small, medium, large],
        }
    }

    /// Pricing for a tier.
    pub fn get(&self, tier: ModelTier) -> &ModelPricing {
        &self.tiers[tier.index()]
    }

    /// Mutable pricing for a tier (configuration overrides).
    pub fn get_mut(&mut self, tier: ModelTier) -> &mut ModelPricing {
        &mut self.tiers[tier.index()]
    }

    /// Stable identifier string for a tier.
    pub fn model_id(&self, tier: ModelTier) -> &str {
        &self.get(tier).model_id
    }

    /// Resolve a model identifier string back to its tier.
    pub fn tier_for_id(&self, model_id: &str) -> Option<ModelTier> {
        self.tiers
            .iter()
            .find(|p| p.model_id == model_id)
            .map(|p| p.tier)
    }

    /// Relative cost factor versus the small tier (small = 1.0).
    ///
    /// Derived from combined input+output price so the factor stays in sync
    /// with whatever pricing is configured.
    pub fn relative_cost(&self, tier: ModelTier) -> f64 {
        let small = self.get(ModelTier::Small);
        let target = self.get(tier);
        let small_combined = small.input_cost_per_1m + small.output_cost_per_1m;
        if small_combined == 0.0 {
            return 1.0;
        }
        (target.input_cost_per_1m + target.output_cost_per_1m) / small_combined
    }

    /// All per-tier pricing entries, cheapest first.
    pub fn entries(&self) -> &[ModelPricing; 3] {
        &self.tiers
    }
}

/// Record of a single model call (real or avoided by the cache).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsage {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub model: ModelTier,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub routing_reason: String,
    pub cache_hit: bool,
    pub latency_ms: u64,
    pub tool_name: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ModelUsage {
    /// Record for a real model invocation.
    pub fn new(
        model: ModelTier,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        routing_reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            model,
            input_tokens,
            output_tokens,
            cost_usd,
            routing_reason: routing_reason.into(),
            cache_hit: false,
            latency_ms: 0,
            tool_name: None,
            user_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Record for a query served from the cache; tokens and cost are zero.
    pub fn cache_hit(model: ModelTier, routing_reason: impl Into<String>) -> Self {
        let mut usage = Self::new(model, 0, 0, 0.0, routing_reason);
        usage.cache_hit = true;
        usage
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Total tokens across input and output.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Savings recorded at append time (stored in metadata for cache hits).
    pub fn saved_usd(&self) -> f64 {
        self.metadata
            .get("saved_usd")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0)
    }
}

/// Cost reporting periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPeriod {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl CostPeriod {
    /// Window length for this period.
    pub fn duration(self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(1),
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::weeks(1),
            Self::Monthly => Duration::days(30),
        }
    }
}

/// Aggregated costs and savings over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    pub period: CostPeriod,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_cost: f64,
    pub total_saved: f64,
    pub routing_savings: f64,
    pub cache_savings: f64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub model_distribution: HashMap<ModelTier, u64>,
    pub average_latency_ms: f64,
}

impl CostSummary {
    /// Build a summary by grouping a window of usage records.
    ///
    /// Routing savings compare each real call against the large-tier
    /// baseline; cache savings come from the `saved_usd` figure recorded
    /// when the hit was appended.
    pub fn from_records(
        period: CostPeriod,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        records: &[ModelUsage],
        pricing: &PricingTable,
    ) -> Self {
        let baseline = pricing.get(ModelTier::Large);

        let mut total_cost = 0.0;
        let mut routing_savings = 0.0;
        let mut cache_savings = 0.0;
        let mut cache_hits = 0u64;
        let mut latency_sum = 0u64;
        let mut model_distribution: HashMap<ModelTier, u64> = HashMap::new();

        for record in records {
            total_cost += record.cost_usd;
            latency_sum += record.latency_ms;
            *model_distribution.entry(record.model).or_insert(0) += 1;

            if record.cache_hit {
                cache_hits += 1;
                cache_savings += record.saved_usd();
            } else {
                let baseline_cost =
                    baseline.calculate_cost(record.input_tokens, record.output_tokens);
                routing_savings += baseline_cost - record.cost_usd;
            }
        }

        let total_requests = records.len() as u64;
        let average_latency_ms = if total_requests > 0 {
            latency_sum as f64 / total_requests as f64
        } else {
            0.0
        };

        Self {
            period,
            start_time,
            end_time,
            total_cost,
            total_saved: routing_savings + cache_savings,
            routing_savings,
            cache_savings,
            total_requests,
            cache_hits,
            model_distribution,
            average_latency_ms,
        }
    }

    /// Savings as a percentage of the baseline spend.
    pub fn savings_percentage(&self) -> f64 {
        let baseline = self.total_cost + self.total_saved;
        if baseline == 0.0 {
            return 0.0;
        }
        (self.total_saved / baseline) * 100.0
    }

    /// Cache hit rate as a percentage of all requests.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.cache_hits as f64 / self.total_requests as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricing_calculation() {
        let table = PricingTable::default();
        // 1M input + 500k output on medium: 1 * $3 + 0.5 * $15 = $10.5
        let cost = table.get(ModelTier::Medium).calculate_cost(1_000_000, 500_000);
        assert!((cost - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_relative_cost_derivation() {
        let table = PricingTable::default();
        assert!((table.relative_cost(ModelTier::Small) - 1.0).abs() < 1e-9);
        assert!((table.relative_cost(ModelTier::Medium) - 12.0).abs() < 1e-9);
        assert!((table.relative_cost(ModelTier::Large) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_tier_for_id() {
        let table = PricingTable::default();
        assert_eq!(
            table.tier_for_id("claude-3-5-sonnet-20241022"),
            Some(ModelTier::Medium)
        );
        assert_eq!(table.tier_for_id("unknown-model"), None);
    }

    #[test]
    fn test_cache_hit_usage_is_zero_cost() {
        let usage = ModelUsage::cache_hit(ModelTier::Medium, "semantic cache hit");
        assert!(usage.cache_hit);
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 0);
        assert_eq!(usage.cost_usd, 0.0);
    }

    #[test]
    fn test_summary_aggregation() {
        let table = PricingTable::default();
        let now = Utc::now();

        let records = vec![
            // Small-tier call that the baseline would have priced at large
            ModelUsage::new(
                ModelTier::Small,
                1_000_000,
                0,
                0.25,
                "short query",
            )
            .with_latency(100),
            // Cache hit with recorded savings
            ModelUsage::cache_hit(ModelTier::Medium, "semantic cache hit")
                .with_latency(10)
                .with_metadata("saved_usd", serde_json::json!(2.0)),
        ];

        let summary = CostSummary::from_records(
            CostPeriod::Daily,
            now - Duration::days(1),
            now,
            &records,
            &table,
        );

        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.cache_hits, 1);
        assert!((summary.total_cost - 0.25).abs() < 1e-9);
        // Baseline for the real call: 1M input at $15 = $15.0
        assert!((summary.routing_savings - 14.75).abs() < 1e-9);
        assert!((summary.cache_savings - 2.0).abs() < 1e-9);
        assert!((summary.cache_hit_rate() - 50.0).abs() < 1e-9);
        assert!(summary.savings_percentage() > 0.0);
        assert_eq!(summary.model_distribution[&ModelTier::Small], 1);
        assert!((summary.average_latency_ms - 55.0).abs() < 1e-9);
    }
}

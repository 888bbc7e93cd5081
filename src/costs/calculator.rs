//! Pure cost arithmetic: per-call cost, baseline, savings, projections.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{Error, Result};
use crate::routing::types::ModelTier;

use super::types::PricingTable;

/// Breakdown of a single call's cost versus the always-large baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavingsBreakdown {
    pub actual_cost: f64,
    pub baseline_cost: f64,
    pub savings: f64,
    pub savings_percentage: f64,
    pub model_used: Option<ModelTier>,
    pub baseline_model: Option<ModelTier>,
}

/// Workload parameterisation for monthly projections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadAssumptions {
    /// Average requests per day
    pub daily_requests: u64,
    /// Percentage share of requests per tier (sums to ~100)
    pub model_distribution: HashMap<ModelTier, f64>,
    /// Average input tokens per request
    pub avg_input_tokens: u64,
    /// Average output tokens per request
    pub avg_output_tokens: u64,
    /// Percentage of requests answered from cache (0-100)
    pub cache_hit_rate: f64,
}

impl Default for WorkloadAssumptions {
    fn default() -> Self {
        Self {
            daily_requests: 1000,
            model_distribution: HashMap::from([
                (ModelTier::Small, 50.0),
                (ModelTier::Medium, 35.0),
                (ModelTier::Large, 15.0),
            ]),
            avg_input_tokens: 1000,
            avg_output_tokens: 500,
            cache_hit_rate: 0.0,
        }
    }
}

/// Projected monthly spend under a workload parameterisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyCostEstimate {
    pub estimated_monthly_cost: f64,
    pub baseline_monthly_cost: f64,
    pub total_monthly_savings: f64,
    pub routing_monthly_savings: f64,
    pub cache_monthly_savings: f64,
    pub savings_percentage: f64,
    /// Projected spend per tier
    pub model_costs: HashMap<ModelTier, f64>,
    pub assumptions: WorkloadAssumptions,
}

/// Stateless cost calculator over a pricing table.
#[derive(Debug, Clone, Default)]
pub struct CostCalculator {
    pricing: PricingTable,
}

impl CostCalculator {
    pub fn new(pricing: PricingTable) -> Self {
        Self { pricing }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Cost in USD for a call on the given tier.
    pub fn cost(&self, model: ModelTier, input_tokens: u64, output_tokens: u64) -> f64 {
        self.pricing
            .get(model)
            .calculate_cost(input_tokens, output_tokens)
    }

    /// Cost for a model identifier string.
    ///
    /// Fails with [`Error::UnknownModel`] when the id is not in the pricing
    /// table; callers that want a conservative default should use
    /// [`Self::cost_for_id_or_baseline`].
    pub fn cost_for_id(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> Result<f64> {
        let tier = self
            .pricing
            .tier_for_id(model_id)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))?;
        Ok(self.cost(tier, input_tokens, output_tokens))
    }

    /// Cost for a model identifier, pricing unknown ids at the large tier.
    pub fn cost_for_id_or_baseline(
        &self,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        match self.cost_for_id(model_id, input_tokens, output_tokens) {
            Ok(cost) => cost,
            Err(_) => {
                warn!(model_id, "no pricing for model, using large-tier pricing");
                self.cost(ModelTier::Large, input_tokens, output_tokens)
            }
        }
    }

    /// Cost if the call had used the most expensive tier.
    pub fn baseline(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.cost(ModelTier::Large, input_tokens, output_tokens)
    }

    /// Savings of routing to `actual_model` versus the large-tier baseline.
    ///
    /// Returns a zero-valued breakdown when both token counts are zero.
    pub fn savings(
        &self,
        actual_model: ModelTier,
        input_tokens: u64,
        output_tokens: u64,
    ) -> SavingsBreakdown {
        if input_tokens == 0 && output_tokens == 0 {
            return SavingsBreakdown::default();
        }

        let actual_cost = self.cost(actual_model, input_tokens, output_tokens);
        let baseline_cost = self.baseline(input_tokens, output_tokens);
        let savings = baseline_cost - actual_cost;
        let savings_percentage = if baseline_cost > 0.0 {
            (savings / baseline_cost) * 100.0
        } else {
            0.0
        };

        SavingsBreakdown {
            actual_cost,
            baseline_cost,
            savings,
            savings_percentage,
            model_used: Some(actual_model),
            baseline_model: Some(ModelTier::Large),
        }
    }

    /// Project monthly spend and savings for a workload.
    pub fn estimate_monthly_cost(&self, assumptions: WorkloadAssumptions) -> MonthlyCostEstimate {
        // Cache hits never reach a model, so they drop out of the effective volume.
        let effective_requests =
            assumptions.daily_requests as f64 * (1.0 - assumptions.cache_hit_rate / 100.0);
        let monthly_requests = effective_requests * 30.0;

        let mut total_cost = 0.0;
        let mut model_costs = HashMap::new();

        for (&tier, &percentage) in &assumptions.model_distribution {
            let requests_for_tier = monthly_requests * (percentage / 100.0);
            let cost = self.cost(
                tier,
                (assumptions.avg_input_tokens as f64 * requests_for_tier) as u64,
                (assumptions.avg_output_tokens as f64 * requests_for_tier) as u64,
            );
            model_costs.insert(tier, cost);
            total_cost += cost;
        }

        let all_monthly_requests = assumptions.daily_requests as f64 * 30.0;
        let baseline_monthly_cost = self.baseline(
            (assumptions.avg_input_tokens as f64 * all_monthly_requests) as u64,
            (assumptions.avg_output_tokens as f64 * all_monthly_requests) as u64,
        );

        let cached_requests = all_monthly_requests * (assumptions.cache_hit_rate / 100.0);
        let cache_monthly_savings = self.baseline(
            (assumptions.avg_input_tokens as f64 * cached_requests) as u64,
            (assumptions.avg_output_tokens as f64 * cached_requests) as u64,
        );

        let total_monthly_savings = baseline_monthly_cost - total_cost;
        let routing_monthly_savings = total_monthly_savings - cache_monthly_savings;
        let savings_percentage = if baseline_monthly_cost > 0.0 {
            (total_monthly_savings / baseline_monthly_cost) * 100.0
        } else {
            0.0
        };

        MonthlyCostEstimate {
            estimated_monthly_cost: total_cost,
            baseline_monthly_cost,
            total_monthly_savings,
            routing_monthly_savings,
            cache_monthly_savings,
            savings_percentage,
            model_costs,
            assumptions,
        }
    }
}

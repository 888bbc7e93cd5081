//! Routing engine: overrides first, then the rule stack, then the default.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::costs::{CostCalculator, MonthlyCostEstimate, WorkloadAssumptions};

use super::escalation::EscalationLayer;
use super::provider::ModelProvider;
use super::rules::RuleStack;
use super::types::{ModelSelection, ModelTier, Query, RoutingMetrics, RoutingMetricsSnapshot};

/// Selects a model for each query and accumulates routing metrics.
pub struct RoutingEngine {
    rules: RuleStack,
    escalation: Arc<EscalationLayer>,
    provider: Arc<dyn ModelProvider>,
    default_model: ModelTier,
    calculator: CostCalculator,
    metrics: RoutingMetrics,
}

impl RoutingEngine {
    pub fn new(
        rules: RuleStack,
        escalation: Arc<EscalationLayer>,
        provider: Arc<dyn ModelProvider>,
        default_model: ModelTier,
    ) -> Self {
        Self {
            rules,
            escalation,
            provider,
            default_model,
            calculator: CostCalculator::default(),
            metrics: RoutingMetrics::new(),
        }
    }

    pub fn with_calculator(mut self, calculator: CostCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn escalation(&self) -> &EscalationLayer {
        &self.escalation
    }

    pub fn default_model(&self) -> ModelTier {
        self.default_model
    }

    /// Route a query to a model.
    ///
    /// Overrides win when their model is available; otherwise the rule
    /// stack decides, falling back to the configured default.
    pub async fn route(&self, query: &Query, session_id: Option<&str>) -> ModelSelection {
        if let Some(override_) = self.escalation.resolve(query, session_id) {
            if self.provider.is_available(override_.model).await {
                let selection =
                    ModelSelection::overridden(override_.model, override_.source, override_.reason);
                self.metrics.record(&selection);
                return selection;
            }
            warn!(
                model = %override_.model,
                source = %override_.source,
                "override model unavailable, falling back to rules"
            );
        }

        let (model, decision) = match self.rules.evaluate_all(query) {
            Some(mut decision) => {
                if self.provider.is_available(decision.model).await {
                    (decision.model, Some(decision))
                } else {
                    warn!(
                        model = %decision.model,
                        fallback = %self.default_model,
                        "decided model unavailable"
                    );
                    decision.reason.push_str(" (original unavailable)");
                    decision.model = self.default_model;
                    (self.default_model, Some(decision))
                }
            }
            None => {
                debug!(default = %self.default_model, "no rule fired, using default model");
                (self.default_model, None)
            }
        };

        let selection = ModelSelection::routed(model, decision);
        self.metrics.record(&selection);
        selection
    }

    /// Current routing metrics.
    pub fn metrics(&self) -> RoutingMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Project monthly savings for a caller-supplied workload.
    pub fn estimate_cost_savings(&self, assumptions: WorkloadAssumptions) -> MonthlyCostEstimate {
        self.calculator.estimate_monthly_cost(assumptions)
    }

    /// Project monthly savings using the observed model distribution.
    pub fn estimate_cost_savings_from_metrics(
        &self,
        daily_requests: u64,
        avg_input_tokens: u64,
        avg_output_tokens: u64,
        cache_hit_rate: f64,
    ) -> MonthlyCostEstimate {
        let snapshot = self.metrics.snapshot();
        let mut assumptions = WorkloadAssumptions {
            daily_requests,
            avg_input_tokens,
            avg_output_tokens,
            cache_hit_rate,
            ..WorkloadAssumptions::default()
        };
        if !snapshot.distribution_percentages.is_empty() {
            assumptions.model_distribution = snapshot.distribution_percentages;
        }
        self.calculator.estimate_monthly_cost(assumptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::escalation::SessionEscalationManager;
    use crate::routing::provider::StaticProvider;
    use crate::routing::rules::LengthBasedRule;
    use crate::routing::types::OverrideSource;

    fn engine_with(rules: RuleStack, provider: StaticProvider) -> RoutingEngine {
        RoutingEngine::new(
            rules,
            Arc::new(EscalationLayer::default()),
            Arc::new(provider),
            ModelTier::Medium,
        )
    }

    fn length_only_stack() -> RuleStack {
        let mut stack = RuleStack::new();
        stack.add_rule(Box::new(LengthBasedRule::default()));
        stack
    }

    #[tokio::test]
    async fn test_length_rule_routes_small() {
        let engine = engine_with(length_only_stack(), StaticProvider::new("ok"));

        let selection = engine.route(&Query::new("a".repeat(120)), None).await;
        assert_eq!(selection.model, ModelTier::Small);
        assert!(!selection.overridden);

        let decision = selection.routing_decision.unwrap();
        assert_eq!(decision.rules_applied, vec!["length_based"]);
        assert!((decision.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_complexity_overrides_length() {
        let engine = engine_with(RuleStack::with_default_rules(), StaticProvider::new("ok"));

        let selection = engine
            .route(&Query::new("please refactor and optimize this module"), None)
            .await;
        assert_eq!(selection.model, ModelTier::Large);

        let decision = selection.routing_decision.unwrap();
        assert_eq!(decision.rules_applied, vec!["complexity_based"]);
        assert!(decision.confidence >= 0.8);
    }

    #[tokio::test]
    async fn test_task_mapping_beats_all() {
        let engine = engine_with(RuleStack::with_default_rules(), StaticProvider::new("ok"));

        let query = Query::new(format!("analyze {}", "x".repeat(3000)))
            .with_tool_name("search_code");
        let selection = engine.route(&query, None).await;

        assert_eq!(selection.model, ModelTier::Small);
        let decision = selection.routing_decision.unwrap();
        assert_eq!(decision.rules_applied, vec!["task_type"]);
        assert!((decision.confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_explicit_override() {
        let engine = engine_with(RuleStack::with_default_rules(), StaticProvider::new("ok"));

        let query = Query::new("hello").with_preferred_model(ModelTier::Large);
        let selection = engine.route(&query, None).await;

        assert!(selection.overridden);
        assert_eq!(selection.override_source, OverrideSource::Explicit);
        assert_eq!(selection.model, ModelTier::Large);
        assert!(selection.routing_decision.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_decision_falls_back_to_default() {
        let provider = StaticProvider::new("ok").with_unavailable(vec![ModelTier::Large]);
        let engine = engine_with(RuleStack::with_default_rules(), provider);

        let selection = engine
            .route(&Query::new("audit the security of this design"), None)
            .await;
        assert_eq!(selection.model, ModelTier::Medium);

        let decision = selection.routing_decision.unwrap();
        assert!(decision.reason.contains("(original unavailable)"));
    }

    #[tokio::test]
    async fn test_unavailable_override_falls_back_to_rules() {
        let provider = StaticProvider::new("ok").with_unavailable(vec![ModelTier::Large]);
        let engine = engine_with(length_only_stack(), provider);

        let query = Query::new("short").with_preferred_model(ModelTier::Large);
        let selection = engine.route(&query, None).await;

        assert!(!selection.overridden);
        assert_eq!(selection.model, ModelTier::Small);
    }

    #[tokio::test]
    async fn test_no_rules_uses_default() {
        let engine = engine_with(RuleStack::new(), StaticProvider::new("ok"));
        let selection = engine.route(&Query::new("anything"), None).await;

        assert_eq!(selection.model, ModelTier::Medium);
        assert!(selection.routing_decision.is_none());
        assert!(!selection.overridden);
    }

    #[tokio::test]
    async fn test_session_override_via_engine() {
        let sessions = Arc::new(SessionEscalationManager::default());
        sessions.set_session_model("s1", ModelTier::Large, None, Some("audit".to_string()));
        let engine = RoutingEngine::new(
            RuleStack::with_default_rules(),
            Arc::new(EscalationLayer::new(sessions, true)),
            Arc::new(StaticProvider::new("ok")),
            ModelTier::Medium,
        );

        let selection = engine.route(&Query::new("what is this"), Some("s1")).await;
        assert!(selection.overridden);
        assert_eq!(selection.override_source, OverrideSource::Session);
        assert_eq!(selection.model, ModelTier::Large);
    }

    #[tokio::test]
    async fn test_metrics_accumulate() {
        let engine = engine_with(RuleStack::with_default_rules(), StaticProvider::new("ok"));

        engine.route(&Query::new("what is this"), None).await;
        engine
            .route(&Query::new("q").with_preferred_model(ModelTier::Large), None)
            .await;

        let metrics = engine.metrics();
        assert_eq!(metrics.total_queries, 2);
        assert_eq!(metrics.override_count, 1);
        assert!(metrics.average_confidence > 0.0);
    }

    #[tokio::test]
    async fn test_cost_savings_estimate() {
        let engine = engine_with(RuleStack::with_default_rules(), StaticProvider::new("ok"));

        let estimate = engine.estimate_cost_savings(WorkloadAssumptions::default());
        assert!(estimate.baseline_monthly_cost > estimate.estimated_monthly_cost);
        assert!(estimate.total_monthly_savings > 0.0);
    }

    #[tokio::test]
    async fn test_cost_savings_from_observed_distribution() {
        let engine = engine_with(length_only_stack(), StaticProvider::new("ok"));
        engine.route(&Query::new("short"), None).await;

        let estimate = engine.estimate_cost_savings_from_metrics(100, 1000, 500, 0.0);
        // Everything observed routed small, so savings approach the maximum
        assert!(estimate.savings_percentage > 90.0);
    }
}

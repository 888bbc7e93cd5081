//! Deterministic routing rules and the priority-ordered stack.

mod complexity;
mod length;
mod task_type;

pub use complexity::ComplexityBasedRule;
pub use length::LengthBasedRule;
pub use task_type::TaskTypeRule;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, warn};

use crate::error::Result;
use crate::routing::types::{Query, RoutingDecision};

/// Consecutive failures after which a rule is disabled for the rest of the
/// process lifetime.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// A deterministic classifier that may produce a routing decision.
pub trait RoutingRule: Send + Sync {
    /// Stable rule name, recorded in `rules_applied`.
    fn name(&self) -> &'static str;

    /// Evaluation priority; higher runs first.
    fn priority(&self) -> i32;

    /// Whether the rule participates in evaluation.
    fn enabled(&self) -> bool;

    /// Evaluate the query; `None` means the rule does not apply.
    fn evaluate(&self, query: &Query) -> Result<Option<RoutingDecision>>;
}

struct RuleSlot {
    rule: Box<dyn RoutingRule>,
    consecutive_failures: AtomicU32,
    auto_disabled: AtomicBool,
}

/// Ordered set of routing rules.
///
/// Rules are evaluated in descending priority; the first non-null decision
/// wins. A rule that errors is skipped, and one that errors repeatedly is
/// disabled until restart.
pub struct RuleStack {
    slots: Vec<RuleSlot>,
}

impl Default for RuleStack {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl RuleStack {
    /// Empty stack.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Stack with the three built-in rules at their default priorities.
    pub fn with_default_rules() -> Self {
        let mut stack = Self::new();
        stack.add_rule(Box::new(LengthBasedRule::default()));
        stack.add_rule(Box::new(ComplexityBasedRule::default()));
        stack.add_rule(Box::new(TaskTypeRule::default()));
        stack
    }

    /// Add a rule, keeping the stack sorted by priority (highest first).
    pub fn add_rule(&mut self, rule: Box<dyn RoutingRule>) {
        self.slots.push(RuleSlot {
            rule,
            consecutive_failures: AtomicU32::new(0),
            auto_disabled: AtomicBool::new(false),
        });
        self.slots.sort_by_key(|slot| -slot.rule.priority());
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|slot| slot.rule.name()).collect()
    }

    /// Evaluate rules in priority order, returning the first decision.
    pub fn evaluate_all(&self, query: &Query) -> Option<RoutingDecision> {
        for slot in &self.slots {
            if slot.auto_disabled.load(Ordering::Relaxed) || !slot.rule.enabled() {
                continue;
            }

            match slot.rule.evaluate(query) {
                Ok(Some(decision)) => {
                    slot.consecutive_failures.store(0, Ordering::Relaxed);
                    debug!(
                        rule = slot.rule.name(),
                        model = %decision.model,
                        confidence = decision.confidence,
                        "rule produced decision"
                    );
                    return Some(decision);
                }
                Ok(None) => {
                    slot.consecutive_failures.store(0, Ordering::Relaxed);
                }
                Err(e) => {
                    let failures = slot.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(rule = slot.rule.name(), error = %e, "rule evaluation failed");
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        slot.auto_disabled.store(true, Ordering::Relaxed);
                        warn!(
                            rule = slot.rule.name(),
                            failures, "rule disabled for process lifetime"
                        );
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::routing::types::ModelTier;

    struct FailingRule;

    impl RoutingRule for FailingRule {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn priority(&self) -> i32 {
            100
        }
        fn enabled(&self) -> bool {
            true
        }
        fn evaluate(&self, _query: &Query) -> Result<Option<RoutingDecision>> {
            Err(Error::Internal("boom".to_string()))
        }
    }

    struct FixedRule {
        priority: i32,
        model: ModelTier,
        name: &'static str,
    }

    impl RoutingRule for FixedRule {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn enabled(&self) -> bool {
            true
        }
        fn evaluate(&self, _query: &Query) -> Result<Option<RoutingDecision>> {
            Ok(Some(
                RoutingDecision::new(self.model, "fixed", 1.0).with_rule(self.name),
            ))
        }
    }

    #[test]
    fn test_priority_order() {
        let mut stack = RuleStack::new();
        stack.add_rule(Box::new(FixedRule {
            priority: 1,
            model: ModelTier::Small,
            name: "low",
        }));
        stack.add_rule(Box::new(FixedRule {
            priority: 10,
            model: ModelTier::Large,
            name: "high",
        }));

        assert_eq!(stack.rule_names(), vec!["high", "low"]);

        let decision = stack.evaluate_all(&Query::new("anything")).unwrap();
        assert_eq!(decision.model, ModelTier::Large);
        assert_eq!(decision.rules_applied, vec!["high"]);
    }

    #[test]
    fn test_failing_rule_is_skipped_then_disabled() {
        let mut stack = RuleStack::new();
        stack.add_rule(Box::new(FailingRule));
        stack.add_rule(Box::new(FixedRule {
            priority: 1,
            model: ModelTier::Small,
            name: "fallback",
        }));

        // The failing rule is skipped; the fallback still answers
        for _ in 0..5 {
            let decision = stack.evaluate_all(&Query::new("q")).unwrap();
            assert_eq!(decision.rules_applied, vec!["fallback"]);
        }

        // After repeated failures the rule is auto-disabled
        assert!(stack.slots[0].auto_disabled.load(Ordering::Relaxed));
    }

    #[test]
    fn test_empty_stack_yields_none() {
        let stack = RuleStack::new();
        assert!(stack.evaluate_all(&Query::new("q")).is_none());
    }

    #[test]
    fn test_default_rules_registered() {
        let stack = RuleStack::with_default_rules();
        assert_eq!(
            stack.rule_names(),
            vec!["task_type", "complexity_based", "length_based"]
        );
    }
}

//! Task-type routing rule keyed on the originating tool name.

use std::collections::HashMap;
use tracing::debug;

use crate::error::Result;
use crate::routing::types::{ModelTier, Query, RoutingDecision};

use super::RoutingRule;

/// Routes on a fixed tool-name to tier mapping.
///
/// Applies only when the query carries a tool name with a known mapping;
/// otherwise it stands aside and lets lower-priority rules decide.
#[derive(Debug, Clone)]
pub struct TaskTypeRule {
    pub task_mappings: HashMap<String, ModelTier>,
    pub priority: i32,
    pub enabled: bool,
}

impl Default for TaskTypeRule {
    fn default() -> Self {
        let task_mappings = HashMap::from([
            ("search_code".to_string(), ModelTier::Small),
            ("find_similar".to_string(), ModelTier::Small),
            ("explain_code".to_string(), ModelTier::Medium),
            ("get_context".to_string(), ModelTier::Medium),
            ("analyze_architecture".to_string(), ModelTier::Large),
            ("refactor_code".to_string(), ModelTier::Large),
            ("security_audit".to_string(), ModelTier::Large),
        ]);
        Self {
            task_mappings,
            priority: 30,
            enabled: true,
        }
    }
}

impl TaskTypeRule {
    /// Add or update a task mapping.
    pub fn add_mapping(&mut self, task: impl Into<String>, model: ModelTier) {
        self.task_mappings.insert(task.into(), model);
    }

    /// Remove a task mapping.
    pub fn remove_mapping(&mut self, task: &str) {
        self.task_mappings.remove(task);
    }
}

impl RoutingRule for TaskTypeRule {
    fn name(&self) -> &'static str {
        "task_type"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn evaluate(&self, query: &Query) -> Result<Option<RoutingDecision>> {
        let Some(tool_name) = query.tool_name.as_deref() else {
            return Ok(None);
        };
        let Some(&model) = self.task_mappings.get(tool_name) else {
            debug!(tool_name, "task type not in mappings");
            return Ok(None);
        };

        debug!(tool_name, model = %model, "task rule");

        Ok(Some(
            RoutingDecision::new(
                model,
                format!("Task '{}' mapped to the {} tier", tool_name, model),
                0.95,
            )
            .with_rule(self.name())
            .with_metadata("task_type", serde_json::json!(tool_name))
            .with_metadata("mapped_model", serde_json::json!(model.to_string())),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_tool_routes_with_high_confidence() {
        let rule = TaskTypeRule::default();
        let query = Query::new("a".repeat(3000)).with_tool_name("search_code");

        let decision = rule.evaluate(&query).unwrap().unwrap();
        assert_eq!(decision.model, ModelTier::Small);
        assert!((decision.confidence - 0.95).abs() < 1e-9);
        assert_eq!(decision.rules_applied, vec!["task_type"]);
    }

    #[test]
    fn test_no_tool_name_yields_none() {
        let rule = TaskTypeRule::default();
        assert!(rule.evaluate(&Query::new("anything")).unwrap().is_none());
    }

    #[test]
    fn test_unmapped_tool_yields_none() {
        let rule = TaskTypeRule::default();
        let query = Query::new("anything").with_tool_name("unknown_tool");
        assert!(rule.evaluate(&query).unwrap().is_none());
    }

    #[test]
    fn test_expensive_tools_route_large() {
        let rule = TaskTypeRule::default();
        for tool in ["analyze_architecture", "refactor_code", "security_audit"] {
            let query = Query::new("q").with_tool_name(tool);
            assert_eq!(rule.evaluate(&query).unwrap().unwrap().model, ModelTier::Large);
        }
    }

    #[test]
    fn test_add_and_remove_mapping() {
        let mut rule = TaskTypeRule::default();
        rule.add_mapping("summarize_docs", ModelTier::Medium);

        let query = Query::new("q").with_tool_name("summarize_docs");
        assert_eq!(rule.evaluate(&query).unwrap().unwrap().model, ModelTier::Medium);

        rule.remove_mapping("summarize_docs");
        assert!(rule.evaluate(&query).unwrap().is_none());
    }
}

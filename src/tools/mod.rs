//! Tool surface consumed by an MCP-style transport.
//!
//! Each tool is a name, a JSON schema, and a handler returning a
//! `{"success": bool, ...}` payload. The query tools validate input and
//! acknowledge with a plan; the retrieval work itself lives outside the
//! core. `escalate_query` is handled in full against the session manager.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;

use crate::costs::PricingTable;
use crate::error::{Error, Result};
use crate::routing::escalation::SessionEscalationManager;
use crate::routing::types::ModelTier;

/// A tool definition exported to the transport.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must be unique)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Value::Object(Default::default()),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Type alias for tool handler function.
pub type ToolHandler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Registry of tools.
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, ToolHandler)>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry with the default tool set.
    pub fn with_defaults(sessions: Arc<SessionEscalationManager>, pricing: PricingTable) -> Self {
        let mut registry = Self::new();

        for name in ["search_code", "explain_code", "find_similar", "get_context"] {
            registry.register_query_tool(name);
        }
        registry.register_escalate_query(sessions, pricing);

        registry
    }

    /// Register a tool with its handler.
    pub fn register(&mut self, tool: ToolDefinition, handler: ToolHandler) {
        self.tools.insert(tool.name.clone(), (tool, handler));
    }

    /// Get a tool definition by name.
    pub fn get_tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|(tool, _)| tool)
    }

    /// All tool definitions.
    pub fn tools(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|(tool, _)| tool).collect()
    }

    /// Execute a tool by name.
    pub fn execute(&self, name: &str, input: Value) -> Result<Value> {
        let (_, handler) = self
            .tools
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("unknown tool: {}", name)))?;
        handler(input)
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Export definitions as the transport's tool listing.
    pub fn export_schema(&self) -> Value {
        let tools: Vec<Value> = self
            .tools()
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();

        json!({ "tools": tools })
    }

    fn query_tool_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query to process"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 50,
                    "description": "Maximum results to return",
                    "default": 10
                },
                "language": {
                    "type": "string",
                    "enum": ["python", "rust", "javascript", "typescript", "go", "java"],
                    "description": "Restrict to a source language"
                },
                "file_pattern": {
                    "type": "string",
                    "description": "Glob pattern to restrict files"
                },
                "min_score": {
                    "type": "number",
                    "minimum": 0.0,
                    "maximum": 1.0,
                    "description": "Minimum relevance score"
                }
            },
            "required": ["query"]
        })
    }

    fn register_query_tool(&mut self, name: &'static str) {
        let description = match name {
            "search_code" => "Search the indexed codebase for relevant chunks",
            "explain_code" => "Explain a piece of code with assembled context",
            "find_similar" => "Find code similar to the given snippet or query",
            _ => "Retrieve assembled context for a query",
        };
        let tool = ToolDefinition::new(name, description).with_schema(Self::query_tool_schema());

        let handler: ToolHandler = Arc::new(move |input| {
            let Some(query) = input.get("query").and_then(Value::as_str) else {
                return Ok(json!({
                    "success": false,
                    "error": "query is required"
                }));
            };
            if let Some(limit) = input.get("limit").and_then(Value::as_i64) {
                if !(1..=50).contains(&limit) {
                    return Ok(json!({
                        "success": false,
                        "error": "limit must be between 1 and 50"
                    }));
                }
            }

            // Retrieval happens outside the core; acknowledge with a plan
            Ok(json!({
                "success": true,
                "status": "accepted",
                "tool": name,
                "query": query,
            }))
        });

        self.register(tool, handler);
    }

    fn register_escalate_query(
        &mut self,
        sessions: Arc<SessionEscalationManager>,
        pricing: PricingTable,
    ) {
        let tool = ToolDefinition::new(
            "escalate_query",
            "Manually request a more capable model for complex queries",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query to process with the escalated model"
                },
                "model": {
                    "type": "string",
                    "enum": ["medium", "large"],
                    "description": "Model tier to escalate to",
                    "default": "large"
                },
                "reason": {
                    "type": "string",
                    "description": "Reason for escalation (optional)"
                },
                "duration": {
                    "type": "string",
                    "enum": ["single", "session"],
                    "description": "Apply to a single query or the entire session",
                    "default": "single"
                },
                "session_id": {
                    "type": "string",
                    "description": "Session ID for session-level escalation"
                }
            },
            "required": ["query"]
        }));

        let handler: ToolHandler = Arc::new(move |input| {
            match escalate(&sessions, &pricing, &input) {
                Ok(result) => Ok(result),
                Err(e) => {
                    error!(error = %e, "escalate_query failed");
                    Ok(json!({
                        "success": false,
                        "error": e.to_string(),
                        "status": e.exit_status().to_string(),
                    }))
                }
            }
        });

        self.register(tool, handler);
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn cost_impact(pricing: &PricingTable, model: ModelTier) -> Value {
    let factor = pricing.relative_cost(model);
    json!({
        "relative_cost": factor,
        "times_more_expensive": factor,
        "note": format!(
            "{} is ~{}x more expensive than {}",
            model.display_name(),
            factor.round() as i64,
            ModelTier::Small.display_name(),
        ),
    })
}

fn escalate(
    sessions: &SessionEscalationManager,
    pricing: &PricingTable,
    input: &Value,
) -> Result<Value> {
    let query = input
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("query is required".to_string()))?;

    let model_name = input
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("large");
    let model = ModelTier::from_str(model_name)
        .map_err(|_| Error::InvalidInput(format!("invalid model: {}", model_name)))?;
    if model == ModelTier::Small {
        return Err(Error::InvalidInput(
            "escalation target must be medium or large".to_string(),
        ));
    }

    let reason = input
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("Manual escalation requested")
        .to_string();
    let duration = input
        .get("duration")
        .and_then(Value::as_str)
        .unwrap_or("single");

    match duration {
        "session" => {
            let session_id = input
                .get("session_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::InvalidInput(
                        "session_id is required for session escalation".to_string(),
                    )
                })?;
            sessions.set_session_model(session_id, model, None, Some(reason.clone()));

            Ok(json!({
                "success": true,
                "escalation": {
                    "type": "session",
                    "model": model.to_string(),
                    "session_id": session_id,
                    "reason": reason,
                    "cost_impact": cost_impact(pricing, model),
                    "message": format!(
                        "All queries in session will use the {} tier",
                        model
                    ),
                }
            }))
        }
        "single" => Ok(json!({
            "success": true,
            "escalation": {
                "type": "single",
                "model": model.to_string(),
                "reason": reason,
                "query": query,
                "cost_impact": cost_impact(pricing, model),
                "message": format!("Query will be processed with the {} tier", model),
            },
            "instructions": {
                // The caller re-submits with the preference set; the tool
                // never routes re-entrantly
                "next_step": "Submit the query with this model as the explicit preference",
            }
        })),
        other => Err(Error::InvalidInput(format!("invalid duration: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (ToolRegistry, Arc<SessionEscalationManager>) {
        let sessions = Arc::new(SessionEscalationManager::default());
        let registry = ToolRegistry::with_defaults(Arc::clone(&sessions), PricingTable::default());
        (registry, sessions)
    }

    #[test]
    fn test_default_tools_registered() {
        let (registry, _) = registry();
        assert_eq!(registry.count(), 5);
        for name in [
            "search_code",
            "explain_code",
            "find_similar",
            "get_context",
            "escalate_query",
        ] {
            assert!(registry.get_tool(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_export_schema() {
        let (registry, _) = registry();
        let schema = registry.export_schema();
        assert_eq!(schema["tools"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_unknown_tool() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.execute("made_up", json!({})),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_query_tool_requires_query() {
        let (registry, _) = registry();
        let result = registry.execute("search_code", json!({})).unwrap();
        assert_eq!(result["success"], json!(false));

        let result = registry
            .execute("search_code", json!({"query": "auth flow"}))
            .unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["tool"], json!("search_code"));
    }

    #[test]
    fn test_query_tool_limit_bounds() {
        let (registry, _) = registry();
        let result = registry
            .execute("search_code", json!({"query": "q", "limit": 100}))
            .unwrap();
        assert_eq!(result["success"], json!(false));
    }

    #[test]
    fn test_escalate_single_returns_plan_with_cost_note() {
        let (registry, _) = registry();
        let result = registry
            .execute("escalate_query", json!({"query": "hard problem"}))
            .unwrap();

        assert_eq!(result["success"], json!(true));
        let escalation = &result["escalation"];
        assert_eq!(escalation["type"], json!("single"));
        assert_eq!(escalation["model"], json!("large"));
        assert_eq!(
            escalation["cost_impact"]["times_more_expensive"],
            json!(60.0)
        );
        assert!(escalation["cost_impact"]["note"]
            .as_str()
            .unwrap()
            .contains("60x"));
    }

    #[test]
    fn test_escalate_session_sets_session_model() {
        let (registry, sessions) = registry();
        let result = registry
            .execute(
                "escalate_query",
                json!({
                    "query": "q",
                    "model": "medium",
                    "duration": "session",
                    "session_id": "s1",
                }),
            )
            .unwrap();

        assert_eq!(result["success"], json!(true));
        let override_ = sessions.get_session_model("s1").unwrap();
        assert_eq!(override_.model, ModelTier::Medium);
    }

    #[test]
    fn test_escalate_session_requires_session_id() {
        let (registry, _) = registry();
        let result = registry
            .execute(
                "escalate_query",
                json!({"query": "q", "duration": "session"}),
            )
            .unwrap();
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["status"], json!("invalid_input"));
    }

    #[test]
    fn test_escalate_rejects_small() {
        let (registry, _) = registry();
        let result = registry
            .execute("escalate_query", json!({"query": "q", "model": "small"}))
            .unwrap();
        assert_eq!(result["success"], json!(false));
    }

    #[test]
    fn test_escalate_rejects_unknown_model() {
        let (registry, _) = registry();
        let result = registry
            .execute("escalate_query", json!({"query": "q", "model": "gpt-4"}))
            .unwrap();
        assert_eq!(result["success"], json!(false));
    }
}

//! Intelligent model selection.
//!
//! A query first passes the escalation layer (explicit preference, session
//! escalation, inline hint); absent an override, the priority-ordered rule
//! stack decides, with a configured default as the last resort.

mod engine;
pub mod escalation;
pub mod provider;
pub mod rules;
pub mod types;

pub use engine::RoutingEngine;
pub use escalation::{
    parse_inline_hint, ActiveSessionInfo, EscalationCounters, EscalationLayer, InlineHint,
    ModelOverride, SessionEscalation, SessionEscalationManager,
};
pub use provider::{
    AnthropicProvider, ChatMessage, ChatRole, CompletionResponse, CompletionStream, ModelProvider,
    ProviderConfig, StaticProvider, TokenUsage,
};
pub use rules::{ComplexityBasedRule, LengthBasedRule, RoutingRule, RuleStack, TaskTypeRule};
pub use types::{
    ModelSelection, ModelTier, OverrideSource, Query, RoutingDecision, RoutingMetrics,
    RoutingMetricsSnapshot,
};

//! # signal-hub
//!
//! An intelligent mediator between interactive developer clients and a
//! family of LLMs of differing cost and capability. Every query is routed
//! to the cheapest model that can serve it, checked against a semantic
//! cache of previously answered queries, and accounted for in a persistent
//! cost ledger that attributes savings to routing versus caching.
//!
//! ## Core Components
//!
//! - **Routing**: escalation overrides, a priority-ordered rule stack, and
//!   the engine that selects a model per query
//! - **Cache**: embedding-based reuse of cached responses with TTL, LRU,
//!   and quality-score eviction under a maintenance loop
//! - **Costs**: pure cost arithmetic and an append-only usage ledger with
//!   time-window aggregation
//! - **Pipeline**: the route → reuse → invoke → account flow
//!
//! ## Example
//!
//! ```rust,ignore
//! use signal_hub::{Query, QueryPipeline, Settings, StaticProvider};
//! use std::sync::Arc;
//!
//! let settings = Settings::from_env()?;
//! let pipeline = QueryPipeline::from_settings(
//!     &settings,
//!     Arc::new(StaticProvider::new("answer")),
//! )?;
//!
//! let response = pipeline.handle(Query::new("What is X?"), None).await?;
//! println!("{} (cache hit: {})", response.response, response.cache_hit);
//! ```

pub mod cache;
pub mod config;
pub mod costs;
pub mod error;
pub mod pipeline;
pub mod routing;
pub mod tools;

// Re-exports for convenience
pub use cache::{
    CacheConfig, CacheEmbedder, CacheEntryStatus, CacheHealth, CacheLookup, CacheManager,
    CacheSearchResult, CacheStats, CacheStorage, CachedResponse, CompositeEvictionPolicy,
    EmbeddingProvider, EvictionPolicy, EvictionStrategy, HashEmbedder, LruEvictionPolicy,
    MaintenanceReport, MemoryCacheStorage, QualityEvictionPolicy, SemanticCache,
    SqliteCacheStorage, StorageBackend, StorageStats, TtlEvictionPolicy,
};
pub use config::{
    EscalationSettings, LedgerSettings, RoutingSettings, RuleSettings, Settings, ENV_PREFIX,
};
pub use costs::{
    CostCalculator, CostLedger, CostPeriod, CostSummary, ModelPricing, ModelUsage,
    MonthlyCostEstimate, PricingTable, SavingsBreakdown, SqliteCostLedger, WorkloadAssumptions,
};
pub use error::{Error, ExitStatus, Result};
pub use pipeline::{PipelineHealth, PipelineResponse, QueryPipeline};
pub use routing::{
    parse_inline_hint, ActiveSessionInfo, AnthropicProvider, ChatMessage, ChatRole,
    CompletionResponse, ComplexityBasedRule, EscalationCounters, EscalationLayer, InlineHint,
    LengthBasedRule, ModelOverride, ModelProvider, ModelSelection, ModelTier, OverrideSource,
    ProviderConfig, Query, RoutingDecision, RoutingEngine, RoutingMetrics,
    RoutingMetricsSnapshot, RoutingRule, RuleStack, SessionEscalation, SessionEscalationManager,
    StaticProvider, TaskTypeRule,
};
pub use tools::{ToolDefinition, ToolHandler, ToolRegistry};

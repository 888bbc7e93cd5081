//! Query pipeline: route, reuse, invoke, account.
//!
//! Order within one query is fixed: override resolution, rule evaluation,
//! cache lookup, model invocation, cache store, ledger append. Cache and
//! ledger failures degrade without failing the request.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::cache::{
    CacheEmbedder, CacheManager, CacheStorage, MemoryCacheStorage, SemanticCache,
    SqliteCacheStorage, StorageBackend,
};
use crate::config::Settings;
use crate::costs::{CostCalculator, CostLedger, ModelUsage, SqliteCostLedger};
use crate::error::{Error, Result};
use crate::routing::escalation::{parse_inline_hint, EscalationLayer, SessionEscalationManager};
use crate::routing::provider::{ChatMessage, ModelProvider};
use crate::routing::types::{ModelSelection, OverrideSource, Query};
use crate::routing::RoutingEngine;

/// Outcome of one handled query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub selection: ModelSelection,
    pub response: serde_json::Value,
    pub cache_hit: bool,
    pub similarity: Option<f32>,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

/// Pipeline health counters surfaced alongside metrics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub ledger_append_failures: u64,
}

/// End-to-end query handling over the routing, cache, and ledger subsystems.
pub struct QueryPipeline {
    engine: Arc<RoutingEngine>,
    cache: Arc<SemanticCache>,
    provider: Arc<dyn ModelProvider>,
    ledger: Arc<dyn CostLedger>,
    calculator: CostCalculator,
    manager: Option<Arc<CacheManager>>,
    retention_days: Option<u32>,
    ledger_append_failures: AtomicU64,
}

impl QueryPipeline {
    pub fn new(
        engine: Arc<RoutingEngine>,
        cache: Arc<SemanticCache>,
        provider: Arc<dyn ModelProvider>,
        ledger: Arc<dyn CostLedger>,
        calculator: CostCalculator,
    ) -> Self {
        Self {
            engine,
            cache,
            provider,
            ledger,
            calculator,
            manager: None,
            retention_days: None,
            ledger_append_failures: AtomicU64::new(0),
        }
    }

    /// Attach a cache manager so maintenance can be driven alongside the
    /// pipeline.
    pub fn with_cache_manager(mut self, manager: Arc<CacheManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Retention window used by [`Self::prune_ledger`].
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    /// Wire a pipeline from configuration.
    ///
    /// Configuration problems are fatal here; nothing is served on a bad
    /// start-up.
    pub fn from_settings(settings: &Settings, provider: Arc<dyn ModelProvider>) -> Result<Self> {
        settings.validate()?;

        let calculator = CostCalculator::new(settings.models.clone());

        let sessions = Arc::new(SessionEscalationManager::new(
            settings.escalation.session_default_duration_minutes,
        ));
        let escalation = Arc::new(EscalationLayer::new(
            sessions,
            settings.escalation.inline_hints_enabled,
        ));
        let engine = Arc::new(
            RoutingEngine::new(
                settings.routing.build_stack()?,
                escalation,
                Arc::clone(&provider),
                settings.routing.default_model,
            )
            .with_calculator(calculator.clone()),
        );

        let storage: Arc<dyn CacheStorage> = match settings.cache.storage_backend {
            StorageBackend::Memory => Arc::new(MemoryCacheStorage::new(settings.cache.max_entries)),
            StorageBackend::Persistent => {
                let path = Path::new(&settings.ledger.storage_path)
                    .with_file_name("signal_hub_cache.db");
                Arc::new(SqliteCacheStorage::open(path, settings.cache.max_entries)?)
            }
        };
        let cache = Arc::new(SemanticCache::new(
            settings.cache.clone(),
            Arc::new(CacheEmbedder::with_hash_provider()),
            storage,
        ));

        let ledger = Arc::new(SqliteCostLedger::open(&settings.ledger.storage_path)?);

        let manager = Arc::new(CacheManager::new(
            cache.storage(),
            settings.cache.max_entries,
        ));

        Ok(Self::new(engine, cache, provider, ledger, calculator)
            .with_cache_manager(manager)
            .with_retention_days(settings.ledger.retention_days))
    }

    pub fn engine(&self) -> &RoutingEngine {
        &self.engine
    }

    pub fn cache(&self) -> &SemanticCache {
        &self.cache
    }

    pub fn ledger(&self) -> Arc<dyn CostLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn cache_manager(&self) -> Option<Arc<CacheManager>> {
        self.manager.clone()
    }

    /// Prune ledger records older than the configured retention window.
    pub async fn prune_ledger(&self) -> Result<u64> {
        let Some(days) = self.retention_days else {
            return Ok(0);
        };
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
        self.ledger.prune(cutoff).await
    }

    pub fn health(&self) -> PipelineHealth {
        PipelineHealth {
            ledger_append_failures: self.ledger_append_failures.load(Ordering::Relaxed),
        }
    }

    /// Handle one query end to end.
    pub async fn handle(
        &self,
        query: Query,
        session_id: Option<&str>,
    ) -> Result<PipelineResponse> {
        let started = Instant::now();
        let selection = self.engine.route(&query, session_id).await;

        // An applied inline hint is stripped before the text reaches the
        // cache or the model
        let effective_text = if selection.override_source == OverrideSource::Inline {
            parse_inline_hint(&query.text)
                .map(|hint| hint.cleaned_text)
                .unwrap_or_else(|| query.text.clone())
        } else {
            query.text.clone()
        };

        if let Some(hit) = self
            .cache
            .lookup(&effective_text, query.context.as_ref())
            .await
        {
            let latency_ms = started.elapsed().as_millis() as u64;

            // The avoided call is priced at baseline from token estimates
            let input_est = (effective_text.chars().count() / 4) as u64;
            let output_est = (hit.entry.response.to_string().chars().count() / 4) as u64;
            let saved_usd = self.calculator.baseline(input_est, output_est);

            let mut usage = ModelUsage::cache_hit(hit.entry.model, "semantic cache hit")
                .with_latency(latency_ms)
                .with_metadata("saved_usd", serde_json::json!(saved_usd))
                .with_metadata("similarity", serde_json::json!(hit.similarity));
            if let Some(tool_name) = &query.tool_name {
                usage = usage.with_tool_name(tool_name.clone());
            }
            if let Some(user_id) = query.metadata.get("user_id").and_then(|v| v.as_str()) {
                usage = usage.with_user_id(user_id);
            }
            self.append_usage(usage).await;

            debug!(similarity = hit.similarity, "served from cache");
            return Ok(PipelineResponse {
                selection,
                response: hit.entry.response,
                cache_hit: true,
                similarity: Some(hit.similarity),
                cost_usd: 0.0,
                latency_ms,
            });
        }

        let messages = [ChatMessage::user(effective_text.clone())];
        let completion = match self
            .provider
            .complete(selection.model, &messages, 0.7, None)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                error!(error = %e, model = %selection.model, "model invocation failed");
                return Err(Error::Transient("model invocation failed".to_string()));
            }
        };

        let cost_usd = self.calculator.cost(
            selection.model,
            completion.usage.input_tokens,
            completion.usage.output_tokens,
        );
        let response = serde_json::json!({
            "content": completion.content,
            "model": completion.model_id,
        });

        if self.cache.is_enabled() {
            if let Err(e) = self
                .cache
                .store(
                    &effective_text,
                    response.clone(),
                    selection.model,
                    query.context.as_ref(),
                )
                .await
            {
                warn!(error = %e, "cache store failed");
            }
        }

        let routing_reason = selection
            .routing_decision
            .as_ref()
            .map(|d| d.reason.clone())
            .or_else(|| selection.override_reason.clone())
            .unwrap_or_else(|| "default model".to_string());

        let latency_ms = started.elapsed().as_millis() as u64;
        let mut usage = ModelUsage::new(
            selection.model,
            completion.usage.input_tokens,
            completion.usage.output_tokens,
            cost_usd,
            routing_reason,
        )
        .with_latency(latency_ms);
        if let Some(tool_name) = &query.tool_name {
            usage = usage.with_tool_name(tool_name.clone());
        }
        if let Some(user_id) = query.metadata.get("user_id").and_then(|v| v.as_str()) {
            usage = usage.with_user_id(user_id);
        }
        self.append_usage(usage).await;

        Ok(PipelineResponse {
            selection,
            response,
            cache_hit: false,
            similarity: None,
            cost_usd,
            latency_ms,
        })
    }

    /// Append to the ledger; failures are logged and surfaced in health
    /// but never block the response.
    async fn append_usage(&self, usage: ModelUsage) {
        if let Err(e) = self.ledger.append(&usage).await {
            self.ledger_append_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "ledger append failed");
        }
    }
}

//! Semantic cache facade: embed, search, reuse.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::routing::types::ModelTier;

use super::embedder::CacheEmbedder;
use super::eviction::{CompositeEvictionPolicy, EvictionPolicy};
use super::storage::CacheStorage;
use super::types::{CacheConfig, CacheStats, CachedResponse};

/// A successful cache lookup.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub entry: CachedResponse,
    pub similarity: f32,
}

/// Public cache surface combining an embedder with a storage backend.
///
/// Lookup failures (embedder, storage, timeouts) degrade to a miss; only
/// `store` surfaces errors, and its callers are expected to log and move
/// on rather than fail the surrounding request.
pub struct SemanticCache {
    config: CacheConfig,
    embedder: Arc<CacheEmbedder>,
    storage: Arc<dyn CacheStorage>,
    policy: CompositeEvictionPolicy,
    stats: Mutex<CacheStats>,
    deadline: Duration,
}

impl SemanticCache {
    /// Default bound on embedder and storage calls.
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

    pub fn new(
        config: CacheConfig,
        embedder: Arc<CacheEmbedder>,
        storage: Arc<dyn CacheStorage>,
    ) -> Self {
        Self {
            config,
            embedder,
            storage,
            policy: CompositeEvictionPolicy::new(),
            stats: Mutex::new(CacheStats::default()),
            deadline: Self::DEFAULT_DEADLINE,
        }
    }

    /// Bound embedder and storage calls with a custom deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn storage(&self) -> Arc<dyn CacheStorage> {
        Arc::clone(&self.storage)
    }

    pub fn embedder(&self) -> &CacheEmbedder {
        &self.embedder
    }

    /// Look up a semantically equivalent cached response.
    ///
    /// Returns `None` on a miss or on any degraded failure.
    pub async fn lookup(
        &self,
        query_text: &str,
        context: Option<&HashMap<String, serde_json::Value>>,
    ) -> Option<CacheLookup> {
        if !self.config.enabled {
            return None;
        }

        let started = Instant::now();

        let embedding = match tokio::time::timeout(
            self.deadline,
            self.embedder.embed(query_text, context),
        )
        .await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => {
                warn!(error = %e, "embedding failed, treating lookup as miss");
                self.record_miss(started);
                return None;
            }
            Err(_) => {
                warn!("embedding timed out, treating lookup as miss");
                self.record_miss(started);
                return None;
            }
        };

        let search_context = if self.config.context_aware {
            context
        } else {
            None
        };

        let results = match tokio::time::timeout(
            self.deadline,
            self.storage
                .search(&embedding, self.config.similarity_threshold, 1, search_context),
        )
        .await
        {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                warn!(error = %e, "cache search failed, treating lookup as miss");
                self.record_miss(started);
                return None;
            }
            Err(_) => {
                warn!("cache search timed out, treating lookup as miss");
                self.record_miss(started);
                return None;
            }
        };

        let Some(result) = results.into_iter().next() else {
            debug!("cache miss");
            self.record_miss(started);
            return None;
        };

        let mut entry = result.entry;
        entry.record_hit();
        if let Err(e) = self.storage.update(&entry).await {
            // The hit still counts; only the bookkeeping write was lost
            warn!(error = %e, "failed to persist hit bookkeeping");
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats
            .lock()
            .expect("cache stats poisoned")
            .record_hit(result.similarity as f64, elapsed_ms);

        debug!(
            similarity = result.similarity,
            hit_count = entry.hit_count,
            "cache hit"
        );
        Some(CacheLookup {
            entry,
            similarity: result.similarity,
        })
    }

    /// Store a response for future reuse.
    ///
    /// When the backend is full, evicts ~1% of capacity via the composite
    /// policy and retries once.
    pub async fn store(
        &self,
        query_text: &str,
        response: serde_json::Value,
        model: ModelTier,
        context: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<CachedResponse> {
        if !self.config.enabled {
            return Err(Error::InvalidInput("semantic cache is disabled".to_string()));
        }

        let embedding = tokio::time::timeout(self.deadline, self.embedder.embed(query_text, context))
            .await
            .map_err(|_| Error::timeout(self.deadline.as_millis() as u64))?
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let mut entry = CachedResponse::new(
            query_text,
            embedding,
            response,
            model,
            self.config.ttl_seconds(),
        );
        if self.config.context_aware {
            if let Some(context) = context {
                entry = entry.with_context(context.clone());
            }
        }

        if self.storage.add(entry.clone()).await? {
            return Ok(entry);
        }

        // Full: free ~1% of capacity and retry once
        let target = ((self.config.max_entries as f64) * 0.01).ceil() as usize;
        let evicted = self.evict(target).await?;
        info!(evicted, "cache full, evicted entries before retry");

        if self.storage.add(entry.clone()).await? {
            Ok(entry)
        } else {
            Err(Error::Capacity(
                "cache still full after eviction".to_string(),
            ))
        }
    }

    async fn evict(&self, target: usize) -> Result<usize> {
        let snapshot = self.storage.snapshot().await?;
        let mut evicted = 0;
        for id in self.policy.select(&snapshot, target) {
            if self.storage.delete(id).await? {
                evicted += 1;
            }
        }
        self.stats.lock().expect("cache stats poisoned").evictions += evicted as u64;
        Ok(evicted)
    }

    fn record_miss(&self, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats
            .lock()
            .expect("cache stats poisoned")
            .record_miss(elapsed_ms);
    }

    /// Current performance counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().expect("cache stats poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryCacheStorage;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn cache_with(config: CacheConfig, max_entries: usize) -> SemanticCache {
        SemanticCache::new(
            config,
            Arc::new(CacheEmbedder::with_hash_provider()),
            Arc::new(MemoryCacheStorage::new(max_entries)),
        )
    }

    fn default_cache() -> SemanticCache {
        cache_with(CacheConfig::default(), 100)
    }

    #[tokio::test]
    async fn test_store_then_lookup_round_trip() {
        let cache = default_cache();
        let response = serde_json::json!({"content": "X is a thing"});

        cache
            .store("What is X?", response.clone(), ModelTier::Medium, None)
            .await
            .unwrap();

        let hit = cache.lookup("What is X?", None).await.unwrap();
        assert!(hit.similarity >= 0.999);
        assert_eq!(hit.entry.response, response);
        assert_eq!(hit.entry.hit_count, 1);
        assert!(hit.entry.last_accessed.is_some());

        let stats = cache.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.total_queries, 1);
        assert!(stats.average_similarity >= 0.999);
    }

    #[tokio::test]
    async fn test_miss_for_unrelated_query() {
        let cache = default_cache();
        cache
            .store(
                "What is X?",
                serde_json::json!({"content": "..."}),
                ModelTier::Small,
                None,
            )
            .await
            .unwrap();

        // The hash embedder gives unrelated texts uncorrelated vectors
        assert!(cache
            .lookup("Completely different question about Y", None)
            .await
            .is_none());
        assert_eq!(cache.stats().cache_misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = default_cache();
        let stored = cache
            .store(
                "What is X?",
                serde_json::json!({"content": "..."}),
                ModelTier::Small,
                None,
            )
            .await
            .unwrap();

        // Age the entry past its TTL directly in storage
        let storage = cache.storage();
        let mut entry = storage.get(stored.id).await.unwrap().unwrap();
        entry.created_at = Utc::now() - Duration::hours(25);
        storage.update(&entry).await.unwrap();

        assert!(cache.lookup("What is X?", None).await.is_none());
    }

    #[tokio::test]
    async fn test_repeated_hits_increment_count() {
        let cache = default_cache();
        cache
            .store(
                "What is X?",
                serde_json::json!({"content": "..."}),
                ModelTier::Small,
                None,
            )
            .await
            .unwrap();

        let first = cache.lookup("What is X?", None).await.unwrap();
        let second = cache.lookup("What is X?", None).await.unwrap();
        assert_eq!(first.entry.hit_count, 1);
        assert_eq!(second.entry.hit_count, 2);
        assert!(second.entry.last_accessed >= first.entry.last_accessed);
    }

    #[tokio::test]
    async fn test_context_aware_lookup() {
        let cache = default_cache();
        let ctx_a = HashMap::from([("project".to_string(), serde_json::json!("a"))]);
        let ctx_b = HashMap::from([("project".to_string(), serde_json::json!("b"))]);

        cache
            .store(
                "What is X?",
                serde_json::json!({"content": "..."}),
                ModelTier::Small,
                Some(&ctx_a),
            )
            .await
            .unwrap();

        assert!(cache.lookup("What is X?", Some(&ctx_a)).await.is_some());
        assert!(cache.lookup("What is X?", Some(&ctx_b)).await.is_none());
    }

    #[tokio::test]
    async fn test_store_evicts_and_retries_when_full() {
        let mut config = CacheConfig::default();
        config.max_entries = 2;
        let cache = cache_with(config, 2);

        cache
            .store("one", serde_json::json!(1), ModelTier::Small, None)
            .await
            .unwrap();
        cache
            .store("two", serde_json::json!(2), ModelTier::Small, None)
            .await
            .unwrap();

        // Third store triggers a single-pass eviction and succeeds
        cache
            .store("three", serde_json::json!(3), ModelTier::Small, None)
            .await
            .unwrap();

        assert_eq!(cache.storage().size().await, 2);
        assert!(cache.stats().evictions >= 1);
    }

    struct SlowEmbedder;

    #[async_trait::async_trait]
    impl crate::cache::EmbeddingProvider for SlowEmbedder {
        async fn embed_text(&self, _text: &str) -> crate::error::Result<Vec<f32>> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout_degrades_to_miss() {
        let cache = SemanticCache::new(
            CacheConfig::default(),
            Arc::new(CacheEmbedder::new(Arc::new(SlowEmbedder), 10)),
            Arc::new(MemoryCacheStorage::new(10)),
        )
        .with_deadline(std::time::Duration::from_millis(100));

        assert!(cache.lookup("anything", None).await.is_none());
        assert_eq!(cache.stats().cache_misses, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let mut config = CacheConfig::default();
        config.enabled = false;
        let cache = cache_with(config, 10);

        assert!(cache.lookup("anything", None).await.is_none());
        assert!(cache
            .store("anything", serde_json::json!(1), ModelTier::Small, None)
            .await
            .is_err());
        // Disabled lookups are not counted as misses
        assert_eq!(cache.stats().total_queries, 0);
    }
}

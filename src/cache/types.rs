//! Data types for the semantic cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::routing::types::ModelTier;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEntryStatus {
    Active,
    Expired,
    Evicted,
}

/// A cached model response with reuse bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub id: Uuid,
    /// Original query text
    pub query: String,
    /// Embedding of the query text
    pub query_embedding: Vec<f32>,
    /// The response payload that was served
    pub response: serde_json::Value,
    /// Model that produced the response
    pub model: ModelTier,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub hit_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Context keys used for compatibility matching
    pub context: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: CacheEntryStatus,
}

impl CachedResponse {
    pub fn new(
        query: impl Into<String>,
        query_embedding: Vec<f32>,
        response: serde_json::Value,
        model: ModelTier,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            query_embedding,
            response,
            model,
            created_at: Utc::now(),
            ttl_seconds,
            hit_count: 0,
            last_accessed: None,
            context: None,
            metadata: HashMap::new(),
            status: CacheEntryStatus::Active,
        }
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = Some(context);
        self
    }

    /// Age of the entry in seconds.
    pub fn age_seconds(&self) -> f64 {
        (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    /// Whether the entry can no longer be served.
    pub fn is_expired(&self) -> bool {
        if self.status != CacheEntryStatus::Active {
            return true;
        }
        self.age_seconds() > self.ttl_seconds as f64
    }

    /// Record a cache hit.
    pub fn record_hit(&mut self) {
        self.hit_count += 1;
        self.last_accessed = Some(Utc::now());
    }

    /// Context compatibility: keys present in both the filter and the entry
    /// context must match exactly; missing keys are "don't care".
    pub fn matches_context(&self, filter: &HashMap<String, serde_json::Value>) -> bool {
        let Some(context) = &self.context else {
            return true;
        };
        filter
            .iter()
            .all(|(key, value)| context.get(key).map_or(true, |v| v == value))
    }
}

/// Cache storage backend choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Persistent,
}

/// Eviction strategy choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStrategy {
    Lru,
    Ttl,
    Quality,
    Composite,
}

/// Configuration for the semantic cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Minimum reuse score for a hit (0.0 to 1.0)
    pub similarity_threshold: f32,
    pub ttl_hours: u64,
    pub max_entries: usize,
    pub max_memory_mb: usize,
    pub storage_backend: StorageBackend,
    /// Whether lookups filter on context compatibility
    pub context_aware: bool,
    pub eviction_strategy: EvictionStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.85,
            ttl_hours: 24,
            max_entries: 10_000,
            max_memory_mb: 1000,
            storage_backend: StorageBackend::Memory,
            context_aware: true,
            eviction_strategy: EvictionStrategy::Composite,
        }
    }
}

impl CacheConfig {
    /// TTL in seconds.
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_hours * 3600
    }

    /// Validate configured values.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(crate::error::Error::Config(
                "similarity_threshold must be between 0 and 1".to_string(),
            ));
        }
        if self.ttl_hours == 0 {
            return Err(crate::error::Error::Config(
                "ttl_hours must be positive".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(crate::error::Error::Config(
                "max_entries must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A similarity-search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSearchResult {
    pub entry: CachedResponse,
    /// Reuse score in [0, 1]
    pub similarity: f32,
}

impl CacheSearchResult {
    /// Whether the underlying entry is still servable.
    pub fn is_valid(&self) -> bool {
        !self.entry.is_expired()
    }
}

/// Storage-level statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub max_entries: usize,
    pub utilization_percent: f64,
    pub estimated_memory_mb: f64,
}

/// Cache performance counters with running averages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub average_similarity: f64,
    pub average_response_time_ms: f64,
}

impl CacheStats {
    /// Hit rate as a percentage of all lookups.
    pub fn hit_rate(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        (self.cache_hits as f64 / self.total_queries as f64) * 100.0
    }

    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Record a hit with its similarity and latency.
    pub fn record_hit(&mut self, similarity: f64, response_time_ms: f64) {
        self.total_queries += 1;
        self.cache_hits += 1;

        let prior = self.average_similarity * (self.cache_hits - 1) as f64;
        self.average_similarity = (prior + similarity) / self.cache_hits as f64;

        self.update_response_time(response_time_ms);
    }

    /// Record a miss with its latency.
    pub fn record_miss(&mut self, response_time_ms: f64) {
        self.total_queries += 1;
        self.cache_misses += 1;
        self.update_response_time(response_time_ms);
    }

    fn update_response_time(&mut self, response_time_ms: f64) {
        let prior = self.average_response_time_ms * (self.total_queries - 1) as f64;
        self.average_response_time_ms = (prior + response_time_ms) / self.total_queries as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry_with_ttl(ttl_seconds: u64) -> CachedResponse {
        CachedResponse::new(
            "What is X?",
            vec![0.1, 0.2, 0.3],
            serde_json::json!({"content": "X is ..."}),
            ModelTier::Medium,
            ttl_seconds,
        )
    }

    #[test]
    fn test_fresh_entry_not_expired() {
        let entry = entry_with_ttl(3600);
        assert!(!entry.is_expired());
        assert_eq!(entry.status, CacheEntryStatus::Active);
    }

    #[test]
    fn test_expired_by_age() {
        let mut entry = entry_with_ttl(3600);
        entry.created_at = Utc::now() - Duration::hours(2);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_non_active_status_is_expired() {
        let mut entry = entry_with_ttl(3600);
        entry.status = CacheEntryStatus::Evicted;
        assert!(entry.is_expired());
    }

    #[test]
    fn test_record_hit_advances_last_accessed() {
        let mut entry = entry_with_ttl(3600);
        assert!(entry.last_accessed.is_none());

        entry.record_hit();
        assert_eq!(entry.hit_count, 1);
        let first = entry.last_accessed.unwrap();
        assert!(first >= entry.created_at);

        entry.record_hit();
        assert_eq!(entry.hit_count, 2);
        assert!(entry.last_accessed.unwrap() >= first);
    }

    #[test]
    fn test_context_matching() {
        let entry = entry_with_ttl(3600).with_context(HashMap::from([(
            "project".to_string(),
            serde_json::json!("signal-hub"),
        )]));

        // Matching key
        assert!(entry.matches_context(&HashMap::from([(
            "project".to_string(),
            serde_json::json!("signal-hub")
        )])));
        // Mismatching key
        assert!(!entry.matches_context(&HashMap::from([(
            "project".to_string(),
            serde_json::json!("other")
        )])));
        // Key absent from the entry context is "don't care"
        assert!(entry.matches_context(&HashMap::from([(
            "language".to_string(),
            serde_json::json!("rust")
        )])));
    }

    #[test]
    fn test_entry_without_context_matches_everything() {
        let entry = entry_with_ttl(3600);
        assert!(entry.matches_context(&HashMap::from([(
            "anything".to_string(),
            serde_json::json!(42)
        )])));
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());

        let mut config = CacheConfig::default();
        config.similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = CacheConfig::default();
        config.ttl_hours = 0;
        assert!(config.validate().is_err());

        let mut config = CacheConfig::default();
        config.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stats_running_averages() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_hit(0.9, 10.0);
        stats.record_hit(0.95, 20.0);
        stats.record_miss(30.0);

        assert_eq!(stats.total_queries, 3);
        assert!((stats.hit_rate() - 66.666).abs() < 0.01);
        assert!((stats.average_similarity - 0.925).abs() < 1e-9);
        assert!((stats.average_response_time_ms - 20.0).abs() < 1e-9);
        assert!((stats.miss_rate() - 33.333).abs() < 0.01);
    }
}

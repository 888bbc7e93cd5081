//! Cache storage contract and the in-memory backend.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

use super::types::{CacheSearchResult, CachedResponse, StorageStats};

/// Cosine similarity reported as a reuse score in [0, 1].
///
/// The raw cosine is clipped to [-1, 1]; negative correlation is useless
/// for reuse, so it floors at zero. Zero-norm vectors score 0.
pub fn cosine_similarity(u: &[f32], v: &[f32]) -> f32 {
    if u.len() != v.len() || u.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_u = 0.0f32;
    let mut norm_v = 0.0f32;
    for (a, b) in u.iter().zip(v) {
        dot += a * b;
        norm_u += a * a;
        norm_v += b * b;
    }

    if norm_u == 0.0 || norm_v == 0.0 {
        return 0.0;
    }

    (dot / (norm_u.sqrt() * norm_v.sqrt())).clamp(-1.0, 1.0).max(0.0)
}

/// Storage backend for cached responses with similarity search.
///
/// All operations are safe under concurrent readers and writers; mutation
/// is serialised behind a single logical lock per backend.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Add an entry. Returns `false` (no side effect) when capacity is reached.
    async fn add(&self, entry: CachedResponse) -> Result<bool>;

    /// Similarity search over active, non-expired, context-compatible
    /// entries; results sorted by similarity descending.
    async fn search(
        &self,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
        context: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<CacheSearchResult>>;

    /// Fetch an entry by id.
    async fn get(&self, id: Uuid) -> Result<Option<CachedResponse>>;

    /// Replace an existing entry. Returns `false` when the id is unknown.
    async fn update(&self, entry: &CachedResponse) -> Result<bool>;

    /// Delete an entry. Returns `false` when the id is unknown.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Remove all entries; returns how many were removed.
    async fn clear(&self) -> Result<usize>;

    /// Number of stored entries.
    async fn size(&self) -> usize;

    /// Storage statistics.
    async fn get_stats(&self) -> Result<StorageStats>;

    /// Remove expired entries; returns how many were removed.
    async fn cleanup_expired(&self) -> Result<usize>;

    /// Consistent snapshot of all entries, used by maintenance sweeps.
    async fn snapshot(&self) -> Result<Vec<CachedResponse>>;

    /// Backend-specific optimisation pass (no-op by default).
    async fn optimize(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory cache storage.
pub struct MemoryCacheStorage {
    max_entries: usize,
    entries: RwLock<HashMap<Uuid, CachedResponse>>,
}

impl MemoryCacheStorage {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn add(&self, entry: CachedResponse) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            warn!("cache is full, cannot add new entry");
            return Ok(false);
        }

        debug!(id = %entry.id, "added cache entry");
        entries.insert(entry.id, entry);
        Ok(true)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
        context: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<CacheSearchResult>> {
        let entries = self.entries.read().await;

        let mut results: Vec<CacheSearchResult> = entries
            .values()
            .filter(|entry| !entry.is_expired())
            .filter(|entry| context.map_or(true, |ctx| entry.matches_context(ctx)))
            .filter_map(|entry| {
                let similarity = cosine_similarity(query_embedding, &entry.query_embedding);
                (similarity >= threshold).then(|| CacheSearchResult {
                    entry: entry.clone(),
                    similarity,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CachedResponse>> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn update(&self, entry: &CachedResponse) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&entry.id) {
            return Ok(false);
        }
        entries.insert(entry.id, entry.clone());
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let removed = self.entries.write().await.remove(&id).is_some();
        if removed {
            debug!(%id, "deleted cache entry");
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        info!(count, "cleared cache entries");
        Ok(count)
    }

    async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let entries = self.entries.read().await;
        let total = entries.len();
        let expired = entries.values().filter(|e| e.is_expired()).count();

        // Estimate from a sample entry: embedding bytes + serialised payload
        let per_entry_bytes = entries
            .values()
            .next()
            .map(|e| {
                e.query_embedding.len() * std::mem::size_of::<f32>()
                    + serde_json::to_string(e).map(|s| s.len()).unwrap_or(0)
            })
            .unwrap_or(0);

        Ok(StorageStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
            max_entries: self.max_entries,
            utilization_percent: (total as f64 / self.max_entries as f64) * 100.0,
            estimated_memory_mb: (per_entry_bytes * total) as f64 / 1024.0 / 1024.0,
        })
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();

        if removed > 0 {
            info!(removed, "cleaned up expired cache entries");
        }
        Ok(removed)
    }

    async fn snapshot(&self) -> Result<Vec<CachedResponse>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }
}

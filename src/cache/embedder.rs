//! Query embedding with a bounded reuse cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::Result;

/// Embedding dimension used when no external provider is injected.
pub const DEFAULT_DIMENSION: usize = 384;

/// External embedding provider.
///
/// Implementations must be pure with respect to the input text: the same
/// text always yields the same vector, and the dimension is fixed for the
/// lifetime of the provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed output dimension.
    fn dimension(&self) -> usize;
}

/// Deterministic hash-based embedder.
///
/// Stands in when no real provider is configured and backs tests; identical
/// texts map to identical vectors so exact-match lookups score 1.0.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = Vec::with_capacity(DEFAULT_DIMENSION);

        // Derive each 32-byte block from a counter-salted digest so vectors
        // for different texts stay uncorrelated across the full dimension
        let mut block = 0u32;
        while embedding.len() < DEFAULT_DIMENSION {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            for byte in hasher.finalize() {
                if embedding.len() == DEFAULT_DIMENSION {
                    break;
                }
                embedding.push((byte as f32 / 127.5) - 1.0);
            }
            block += 1;
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        DEFAULT_DIMENSION
    }
}

/// Statistics for the embedder's internal cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderCacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub utilization_percent: f64,
}

/// Bounded FIFO of previously computed embeddings.
struct FifoCache {
    map: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
    max_size: usize,
}

impl FifoCache {
    fn new(max_size: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_size,
        }
    }

    fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: String, embedding: Vec<f32>) {
        if self.map.contains_key(&key) {
            return;
        }
        if self.map.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, embedding);
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

/// Embedder facade used by the semantic cache.
///
/// Wraps an optional external provider with a bounded content-addressed
/// FIFO so identical inputs are never re-embedded.
pub struct CacheEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<FifoCache>,
}

impl CacheEmbedder {
    /// Default capacity of the reuse cache.
    pub const DEFAULT_CACHE_SIZE: usize = 1000;

    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache_size: usize) -> Self {
        Self {
            provider,
            cache: Mutex::new(FifoCache::new(cache_size.max(1))),
        }
    }

    /// Embedder with the deterministic hash fallback provider.
    pub fn with_hash_provider() -> Self {
        Self::new(Arc::new(HashEmbedder), Self::DEFAULT_CACHE_SIZE)
    }

    /// Fixed output dimension.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed text, reusing a cached vector for identical inputs.
    pub async fn embed(
        &self,
        text: &str,
        context: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<f32>> {
        let key = Self::cache_key(text, context);

        if let Some(cached) = self.cache.lock().expect("embedder cache poisoned").get(&key) {
            debug!(key = %&key[..8], "embedding cache hit");
            return Ok(cached);
        }

        let embedding = self.provider.embed_text(text).await?;

        self.cache
            .lock()
            .expect("embedder cache poisoned")
            .insert(key, embedding.clone());

        Ok(embedding)
    }

    /// Build the content-addressed key from the text plus the context
    /// fields that change what an embedding means.
    fn cache_key(text: &str, context: Option<&HashMap<String, serde_json::Value>>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());

        if let Some(context) = context {
            for field in ["file_path", "project"] {
                if let Some(value) = context.get(field) {
                    hasher.update(field.as_bytes());
                    hasher.update(b":");
                    hasher.update(value.to_string().as_bytes());
                }
            }
        }

        format!("{:x}", hasher.finalize())
    }

    /// Drop all cached embeddings.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("embedder cache poisoned").clear();
    }

    /// Cache occupancy statistics.
    pub fn cache_stats(&self) -> EmbedderCacheStats {
        let cache = self.cache.lock().expect("embedder cache poisoned");
        EmbedderCacheStats {
            entries: cache.map.len(),
            max_size: cache.max_size,
            utilization_percent: (cache.map.len() as f64 / cache.max_size as f64) * 100.0,
        }
    }
}

//! SQLite-backed persistent cache storage.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::routing::types::ModelTier;

use super::storage::{cosine_similarity, CacheStorage};
use super::types::{CacheEntryStatus, CacheSearchResult, CachedResponse, StorageStats};

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn status_str(status: CacheEntryStatus) -> &'static str {
    match status {
        CacheEntryStatus::Active => "active",
        CacheEntryStatus::Expired => "expired",
        CacheEntryStatus::Evicted => "evicted",
    }
}

fn parse_status(s: &str) -> CacheEntryStatus {
    match s {
        "expired" => CacheEntryStatus::Expired,
        "evicted" => CacheEntryStatus::Evicted,
        _ => CacheEntryStatus::Active,
    }
}

/// Persistent cache storage over SQLite.
///
/// Embeddings are stored as little-endian f32 blobs; similarity is scored
/// in process over the active rows.
pub struct SqliteCacheStorage {
    max_entries: usize,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStorage {
    /// Open or create a cache store at the given path.
    pub fn open(path: impl AsRef<Path>, max_entries: usize) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        Self::initialize(&conn)?;
        Ok(Self {
            max_entries,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory(max_entries: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        Self::initialize(&conn)?;
        Ok(Self {
            max_entries,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        let init = || -> rusqlite::Result<()> {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS cache_entries (
                    id TEXT PRIMARY KEY,
                    query TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    response TEXT NOT NULL,
                    model TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    ttl_seconds INTEGER NOT NULL,
                    hit_count INTEGER NOT NULL DEFAULT 0,
                    last_accessed TEXT,
                    context TEXT,
                    metadata TEXT,
                    status TEXT NOT NULL DEFAULT 'active'
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_cache_entries_created_at
                 ON cache_entries(created_at)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_cache_entries_status
                 ON cache_entries(status)",
                [],
            )?;
            Ok(())
        };
        init().map_err(|e| Error::Storage(e.to_string()))
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::Storage(e.to_string()))
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CachedResponse> {
        let id: String = row.get(0)?;
        let embedding: Vec<u8> = row.get(2)?;
        let response: String = row.get(3)?;
        let model: String = row.get(4)?;
        let created_at: String = row.get(5)?;
        let last_accessed: Option<String> = row.get(8)?;
        let context: Option<String> = row.get(9)?;
        let metadata: Option<String> = row.get(10)?;
        let status: String = row.get(11)?;

        Ok(CachedResponse {
            id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
            query: row.get(1)?,
            query_embedding: blob_to_embedding(&embedding),
            response: serde_json::from_str(&response).unwrap_or(serde_json::Value::Null),
            model: ModelTier::from_str(&model).unwrap_or(ModelTier::Large),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            ttl_seconds: row.get::<_, i64>(6)? as u64,
            hit_count: row.get::<_, i64>(7)? as u64,
            last_accessed: last_accessed
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc)),
            context: context.and_then(|c| serde_json::from_str(&c).ok()),
            metadata: metadata
                .and_then(|m| serde_json::from_str(&m).ok())
                .unwrap_or_default(),
            status: parse_status(&status),
        })
    }

    const SELECT_COLUMNS: &'static str = "id, query, embedding, response, model, created_at, \
         ttl_seconds, hit_count, last_accessed, context, metadata, status";

    fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n as usize)
    }

    fn write_entry(conn: &Connection, entry: &CachedResponse, replace: bool) -> rusqlite::Result<usize> {
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        conn.execute(
            &format!(
                "{verb} INTO cache_entries (
                    id, query, embedding, response, model, created_at, ttl_seconds,
                    hit_count, last_accessed, context, metadata, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                entry.id.to_string(),
                entry.query,
                embedding_to_blob(&entry.query_embedding),
                serde_json::to_string(&entry.response).unwrap_or_default(),
                entry.model.to_string(),
                fmt_ts(entry.created_at),
                entry.ttl_seconds as i64,
                entry.hit_count as i64,
                entry.last_accessed.map(fmt_ts),
                entry
                    .context
                    .as_ref()
                    .map(|c| serde_json::to_string(c).unwrap_or_default()),
                if entry.metadata.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&entry.metadata).unwrap_or_default())
                },
                status_str(entry.status),
            ],
        )
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn add(&self, entry: CachedResponse) -> Result<bool> {
        let max_entries = self.max_entries;
        let inserted = self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
            if count as usize >= max_entries {
                return Ok(false);
            }
            Self::write_entry(conn, &entry, false)?;
            Ok(true)
        })?;

        if inserted {
            debug!(id = %entry.id, "added cache entry");
        } else {
            warn!("cache is full, cannot add new entry");
        }
        Ok(inserted)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
        context: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<CacheSearchResult>> {
        let entries = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM cache_entries WHERE status = 'active'",
                Self::SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], Self::row_to_entry)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut results: Vec<CacheSearchResult> = entries
            .into_iter()
            .filter(|entry| !entry.is_expired())
            .filter(|entry| context.map_or(true, |ctx| entry.matches_context(ctx)))
            .filter_map(|entry| {
                let similarity = cosine_similarity(query_embedding, &entry.query_embedding);
                (similarity >= threshold).then_some(CacheSearchResult { entry, similarity })
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
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM cache_entries WHERE id = ?1",
                Self::SELECT_COLUMNS
            );
            conn.query_row(&sql, params![id.to_string()], Self::row_to_entry)
                .optional()
        })
    }

    async fn update(&self, entry: &CachedResponse) -> Result<bool> {
        let exists = self.get(entry.id).await?.is_some();
        if !exists {
            return Ok(false);
        }
        self.with_conn(|conn| Self::write_entry(conn, entry, true))?;
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let deleted = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM cache_entries WHERE id = ?1",
                params![id.to_string()],
            )
        })?;
        Ok(deleted > 0)
    }

    async fn clear(&self) -> Result<usize> {
        let count = self.with_conn(|conn| conn.execute("DELETE FROM cache_entries", []))?;
        info!(count, "cleared cache entries");
        Ok(count)
    }

    async fn size(&self) -> usize {
        self.count().unwrap_or(0)
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let entries = self.snapshot().await?;
        let total = entries.len();
        let expired = entries.iter().filter(|e| e.is_expired()).count();

        let per_entry_bytes = entries
            .first()
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
        let entries = self.snapshot().await?;
        let expired: Vec<Uuid> = entries
            .iter()
            .filter(|e| e.is_expired())
            .map(|e| e.id)
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.delete(id).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "cleaned up expired cache entries");
        }
        Ok(removed)
    }

    async fn snapshot(&self) -> Result<Vec<CachedResponse>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM cache_entries", Self::SELECT_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], Self::row_to_entry)?;
            rows.collect()
        })
    }

    async fn optimize(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("VACUUM"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(query: &str, embedding: Vec<f32>) -> CachedResponse {
        CachedResponse::new(
            query,
            embedding,
            serde_json::json!({"content": "answer"}),
            ModelTier::Medium,
            3600,
        )
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let embedding = vec![0.1f32, -0.5, 2.0, 0.0];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[tokio::test]
    async fn test_add_search_round_trip() {
        let storage = SqliteCacheStorage::in_memory(10).unwrap();

        let e = entry("What is X?", vec![1.0, 0.0, 0.5]);
        let context = HashMap::from([("project".to_string(), serde_json::json!("hub"))]);
        let e = e.with_context(context.clone());
        storage.add(e.clone()).await.unwrap();

        let results = storage
            .search(&[1.0, 0.0, 0.5], 0.9, 5, Some(&context))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.query, "What is X?");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(results[0].entry.context, Some(context));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let storage = SqliteCacheStorage::in_memory(1).unwrap();
        assert!(storage.add(entry("a", vec![1.0])).await.unwrap());
        assert!(!storage.add(entry("b", vec![1.0])).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_and_get() {
        let storage = SqliteCacheStorage::in_memory(10).unwrap();

        let mut e = entry("q", vec![1.0, 0.0]);
        storage.add(e.clone()).await.unwrap();

        e.record_hit();
        assert!(storage.update(&e).await.unwrap());

        let fetched = storage.get(e.id).await.unwrap().unwrap();
        assert_eq!(fetched.hit_count, 1);
        assert!(fetched.last_accessed.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let storage = SqliteCacheStorage::in_memory(10).unwrap();

        let mut stale = entry("stale", vec![1.0]);
        stale.created_at = Utc::now() - Duration::hours(2);
        stale.ttl_seconds = 3600;
        storage.add(stale).await.unwrap();
        storage.add(entry("fresh", vec![1.0])).await.unwrap();

        assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
        assert_eq!(storage.size().await, 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let storage = SqliteCacheStorage::open(&path, 10).unwrap();
            storage.add(entry("kept", vec![1.0, 0.0])).await.unwrap();
        }

        let reopened = SqliteCacheStorage::open(&path, 10).unwrap();
        assert_eq!(reopened.size().await, 1);
        let results = reopened.search(&[1.0, 0.0], 0.9, 5, None).await.unwrap();
        assert_eq!(results[0].entry.query, "kept");
    }
}

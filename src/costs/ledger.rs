//! Append-only usage ledger with time-window aggregation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::routing::types::ModelTier;

use super::schema::{has_index, initialize_schema, is_initialized};
use super::types::{CostPeriod, CostSummary, ModelUsage, PricingTable};

fn fmt_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width micros so lexicographic range scans stay chronological
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Append-only store of [`ModelUsage`] records.
///
/// Appends that fail are reported to the caller and never retried silently;
/// the caller decides whether the surrounding operation fails.
#[async_trait]
pub trait CostLedger: Send + Sync {
    /// Append one usage record.
    async fn append(&self, usage: &ModelUsage) -> Result<()>;

    /// Records within `[start, end]`, oldest first, optionally per user.
    async fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> Result<Vec<ModelUsage>>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: usize, user_id: Option<&str>) -> Result<Vec<ModelUsage>>;

    /// Total cost over an optional window.
    async fn total_cost(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<f64>;

    /// Delete records before the cutoff; returns the deleted count.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Build a summary for the period ending at `end`.
    async fn summarize(
        &self,
        period: CostPeriod,
        end: DateTime<Utc>,
        user_id: Option<&str>,
        pricing: &PricingTable,
    ) -> Result<CostSummary> {
        let start = end - period.duration();
        let records = self.range(start, end, user_id).await?;
        Ok(CostSummary::from_records(period, start, end, &records, pricing))
    }
}

/// SQLite-backed cost ledger.
pub struct SqliteCostLedger {
    conn: Arc<Mutex<Connection>>,
    index_warning_emitted: AtomicBool,
}

impl SqliteCostLedger {
    /// Open or create a ledger at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            index_warning_emitted: AtomicBool::new(false),
        })
    }

    /// Create an in-memory ledger (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            index_warning_emitted: AtomicBool::new(false),
        })
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

    fn warn_on_missing_indexes(&self, conn: &Connection) {
        if self.index_warning_emitted.load(Ordering::Relaxed) {
            return;
        }
        if !has_index(conn, "idx_model_usage_timestamp") || !has_index(conn, "idx_model_usage_user_id")
        {
            warn!("ledger indexes missing, queries fall back to a full scan");
            self.index_warning_emitted.store(true, Ordering::Relaxed);
        }
    }

    fn row_to_usage(row: &Row<'_>) -> rusqlite::Result<ModelUsage> {
        let id: String = row.get(0)?;
        let timestamp: String = row.get(1)?;
        let model: String = row.get(2)?;
        let metadata: Option<String> = row.get(11)?;

        Ok(ModelUsage {
            id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            model: ModelTier::from_str(&model).unwrap_or(ModelTier::Large),
            input_tokens: row.get::<_, i64>(3)? as u64,
            output_tokens: row.get::<_, i64>(4)? as u64,
            cost_usd: row.get(5)?,
            routing_reason: row.get(6)?,
            cache_hit: row.get::<_, i64>(7)? != 0,
            latency_ms: row.get::<_, i64>(8)? as u64,
            tool_name: row.get(9)?,
            user_id: row.get(10)?,
            metadata: metadata
                .and_then(|m| serde_json::from_str(&m).ok())
                .unwrap_or_default(),
        })
    }

    const SELECT_COLUMNS: &'static str = "id, timestamp, model, input_tokens, output_tokens, \
         cost_usd, routing_reason, cache_hit, latency_ms, tool_name, user_id, metadata";
}

#[async_trait]
impl CostLedger for SqliteCostLedger {
    async fn append(&self, usage: &ModelUsage) -> Result<()> {
        self.with_conn(|conn| {
            let metadata = if usage.metadata.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&usage.metadata).unwrap_or_default())
            };

            conn.execute(
                "INSERT INTO model_usage (
                    id, timestamp, model, input_tokens, output_tokens, cost_usd,
                    routing_reason, cache_hit, latency_ms, tool_name, user_id, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    usage.id.to_string(),
                    fmt_ts(usage.timestamp),
                    usage.model.to_string(),
                    usage.input_tokens as i64,
                    usage.output_tokens as i64,
                    usage.cost_usd,
                    usage.routing_reason,
                    usage.cache_hit as i64,
                    usage.latency_ms as i64,
                    usage.tool_name,
                    usage.user_id,
                    metadata,
                ],
            )?;
            Ok(())
        })?;

        debug!(model = %usage.model, cache_hit = usage.cache_hit, "appended usage record");
        Ok(())
    }

    async fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> Result<Vec<ModelUsage>> {
        self.with_conn(|conn| {
            self.warn_on_missing_indexes(conn);

            let sql = format!(
                "SELECT {} FROM model_usage
                 WHERE timestamp >= ?1 AND timestamp <= ?2
                   AND (?3 IS NULL OR user_id = ?3)
                 ORDER BY timestamp ASC",
                Self::SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![fmt_ts(start), fmt_ts(end), user_id],
                Self::row_to_usage,
            )?;
            rows.collect()
        })
    }

    async fn recent(&self, limit: usize, user_id: Option<&str>) -> Result<Vec<ModelUsage>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM model_usage
                 WHERE (?1 IS NULL OR user_id = ?1)
                 ORDER BY timestamp DESC LIMIT ?2",
                Self::SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id, limit as i64], Self::row_to_usage)?;
            rows.collect()
        })
    }

    async fn total_cost(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<f64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(cost_usd), 0.0) FROM model_usage
                 WHERE (?1 IS NULL OR timestamp >= ?1)
                   AND (?2 IS NULL OR timestamp <= ?2)",
                params![start.map(fmt_ts), end.map(fmt_ts)],
                |row| row.get(0),
            )
            .optional()
            .map(|v| v.unwrap_or(0.0))
        })
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let deleted = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM model_usage WHERE timestamp < ?1",
                params![fmt_ts(before)],
            )
        })?;

        if deleted > 0 {
            debug!(deleted, "pruned ledger records");
        }
        Ok(deleted as u64)
    }
}

//! Cache lifecycle management: maintenance sweeps and forced eviction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::Result;

use super::eviction::{CompositeEvictionPolicy, EvictionPolicy};
use super::storage::CacheStorage;

/// Default sweep interval.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Fraction of capacity to trim down to under pressure.
const CAPACITY_TARGET_RATIO: f64 = 0.9;

/// Outcome of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired_removed: usize,
    pub evicted: usize,
}

/// Health metrics for the cache manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub utilization_percent: f64,
    pub expired_ratio_percent: f64,
    pub maintenance_running: bool,
    pub last_maintenance_at: Option<DateTime<Utc>>,
}

struct ManagerInner {
    storage: Arc<dyn CacheStorage>,
    policy: CompositeEvictionPolicy,
    capacity: usize,
    running: AtomicBool,
    shutdown: Notify,
    last_maintenance: Mutex<Option<DateTime<Utc>>>,
}

impl ManagerInner {
    /// One sweep: drop expired entries, then trim under capacity pressure.
    async fn maintain(&self) -> Result<MaintenanceReport> {
        let expired_removed = self.storage.cleanup_expired().await?;

        let size = self.storage.size().await;
        let mut evicted = 0;
        if size >= self.capacity {
            let target = size - (self.capacity as f64 * CAPACITY_TARGET_RATIO).floor() as usize;
            info!(
                size,
                capacity = self.capacity,
                target,
                "cache over capacity, evicting"
            );

            // Sweep over a snapshot so racing writes are not observed mid-pass
            let snapshot = self.storage.snapshot().await?;
            for id in self.policy.select(&snapshot, target) {
                if self.storage.delete(id).await? {
                    evicted += 1;
                }
            }
        }

        if let Err(e) = self.storage.optimize().await {
            warn!(error = %e, "storage optimisation failed");
        }

        *self
            .last_maintenance
            .lock()
            .expect("maintenance timestamp poisoned") = Some(Utc::now());

        info!(expired_removed, evicted, "maintenance sweep complete");
        Ok(MaintenanceReport {
            expired_removed,
            evicted,
        })
    }
}

/// Orchestrates storage and eviction via a periodic background task.
pub struct CacheManager {
    inner: Arc<ManagerInner>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    pub fn new(storage: Arc<dyn CacheStorage>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                storage,
                policy: CompositeEvictionPolicy::new(),
                capacity,
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
                last_maintenance: Mutex::new(None),
            }),
            interval: DEFAULT_MAINTENANCE_INTERVAL,
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Start the background maintenance task.
    pub fn start(&self) {
        let mut task = self.task.lock().expect("task handle poisoned");
        if task.is_some() {
            warn!("maintenance already running");
            return;
        }

        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;

        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    _ = tokio::time::sleep(interval) => {
                        if !inner.running.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = inner.maintain().await {
                            error!(error = %e, "maintenance sweep failed");
                        }
                    }
                }
            }
        }));

        info!(interval_secs = interval.as_secs(), "started cache maintenance");
    }

    /// Stop the background task, waiting for an in-progress sweep to finish.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        // notify_one stores a permit, so a stop issued mid-sweep is picked
        // up as soon as the task re-enters its select
        self.inner.shutdown.notify_one();

        let task = self.task.lock().expect("task handle poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "maintenance task panicked");
                }
            }
        }
        info!("stopped cache maintenance");
    }

    /// Run one sweep immediately.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        self.inner.maintain().await
    }

    /// Evict every entry.
    pub async fn evict_all(&self) -> Result<usize> {
        let count = self.inner.storage.clear().await?;
        info!(count, "evicted all cache entries");
        Ok(count)
    }

    /// Evict entries whose query text contains the given substring.
    pub async fn evict_matching(&self, pattern: &str) -> Result<usize> {
        let snapshot = self.inner.storage.snapshot().await?;
        let mut evicted = 0;
        for entry in snapshot {
            if entry.query.contains(pattern) && self.inner.storage.delete(entry.id).await? {
                evicted += 1;
            }
        }
        info!(evicted, pattern, "evicted matching cache entries");
        Ok(evicted)
    }

    /// Current health metrics.
    pub async fn health(&self) -> Result<CacheHealth> {
        let stats = self.inner.storage.get_stats().await?;
        let expired_ratio = if stats.total_entries > 0 {
            (stats.expired_entries as f64 / stats.total_entries as f64) * 100.0
        } else {
            0.0
        };

        Ok(CacheHealth {
            utilization_percent: (stats.total_entries as f64 / self.inner.capacity as f64) * 100.0,
            expired_ratio_percent: expired_ratio,
            maintenance_running: self.inner.running.load(Ordering::SeqCst),
            last_maintenance_at: *self
                .inner
                .last_maintenance
                .lock()
                .expect("maintenance timestamp poisoned"),
        })
    }
}

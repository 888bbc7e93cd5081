//! Eviction policy selectors and the composite strategy.

use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use crate::routing::types::ModelTier;

use super::types::CachedResponse;

/// Selects entries to evict from a snapshot.
pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pick up to `target_count` entry ids to evict.
    fn select(&self, entries: &[CachedResponse], target_count: usize) -> HashSet<Uuid>;
}

/// Selects entries past their time-to-live.
///
/// All expired entries are candidates; when over target, the oldest by
/// creation time are preferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlEvictionPolicy;

impl EvictionPolicy for TtlEvictionPolicy {
    fn name(&self) -> &'static str {
        "ttl"
    }

    fn select(&self, entries: &[CachedResponse], target_count: usize) -> HashSet<Uuid> {
        let mut expired: Vec<&CachedResponse> =
            entries.iter().filter(|e| e.is_expired()).collect();

        if expired.len() > target_count {
            expired.sort_by_key(|e| e.created_at);
            expired.truncate(target_count);
        }

        let selected: HashSet<Uuid> = expired.iter().map(|e| e.id).collect();
        debug!(count = selected.len(), "ttl policy selected entries");
        selected
    }
}

/// Selects the least recently used entries.
///
/// Entries never accessed fall back to their creation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LruEvictionPolicy;

impl EvictionPolicy for LruEvictionPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn select(&self, entries: &[CachedResponse], target_count: usize) -> HashSet<Uuid> {
        if entries.is_empty() || target_count == 0 {
            return HashSet::new();
        }

        let mut sorted: Vec<&CachedResponse> = entries.iter().collect();
        sorted.sort_by_key(|e| e.last_accessed.unwrap_or(e.created_at));

        sorted.iter().take(target_count).map(|e| e.id).collect()
    }
}

/// Selects the lowest-quality entries first.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityEvictionPolicy;

impl QualityEvictionPolicy {
    /// Quality score in [0, 1]: hit frequency + recency + model cost class.
    ///
    /// Expensive-to-compute answers score higher so they stay cached.
    pub fn quality_score(entry: &CachedResponse) -> f64 {
        let hit_factor = (entry.hit_count as f64 / 10.0).min(0.4);

        let age_hours = entry.age_seconds() / 3600.0;
        let recency_factor = if age_hours < 1.0 {
            0.3
        } else if age_hours < 24.0 {
            0.2
        } else if age_hours < 168.0 {
            0.1
        } else {
            0.0
        };

        let model_factor = match entry.model {
            ModelTier::Large => 0.3,
            ModelTier::Medium => 0.2,
            ModelTier::Small => 0.1,
        };

        hit_factor + recency_factor + model_factor
    }
}

impl EvictionPolicy for QualityEvictionPolicy {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn select(&self, entries: &[CachedResponse], target_count: usize) -> HashSet<Uuid> {
        if entries.is_empty() || target_count == 0 {
            return HashSet::new();
        }

        let mut scored: Vec<(&CachedResponse, f64)> = entries
            .iter()
            .map(|e| (e, Self::quality_score(e)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .iter()
            .take(target_count)
            .map(|(e, _)| e.id)
            .collect()
    }
}

/// Composite strategy: TTL, then Quality, then LRU.
///
/// Expired entries are always removed; among the live ones, low-value is
/// preferred over merely old, with LRU as the stable last-resort
/// tiebreaker. Each stage reduces the remaining target by the ids it
/// contributed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeEvictionPolicy {
    ttl: TtlEvictionPolicy,
    quality: QualityEvictionPolicy,
    lru: LruEvictionPolicy,
}

impl CompositeEvictionPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for CompositeEvictionPolicy {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn select(&self, entries: &[CachedResponse], target_count: usize) -> HashSet<Uuid> {
        // Expired entries go regardless of target
        let mut evict = self.ttl.select(entries, usize::MAX);
        let mut remaining = target_count.saturating_sub(evict.len());

        for policy in [&self.quality as &dyn EvictionPolicy, &self.lru] {
            if remaining == 0 {
                break;
            }
            let live: Vec<CachedResponse> = entries
                .iter()
                .filter(|e| !evict.contains(&e.id))
                .cloned()
                .collect();
            let selected = policy.select(&live, remaining);
            remaining = remaining.saturating_sub(selected.len());
            evict.extend(selected);
        }

        debug!(
            selected = evict.len(),
            target = target_count,
            "composite policy selected entries"
        );
        evict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry(model: ModelTier, ttl_seconds: u64) -> CachedResponse {
        CachedResponse::new(
            "query",
            vec![1.0, 0.0],
            serde_json::json!({"content": "answer"}),
            model,
            ttl_seconds,
        )
    }

    fn aged(mut e: CachedResponse, hours: i64) -> CachedResponse {
        e.created_at = Utc::now() - Duration::hours(hours);
        e
    }

    #[test]
    fn test_ttl_selects_only_expired() {
        let entries = vec![
            aged(entry(ModelTier::Small, 3600), 2), // expired
            entry(ModelTier::Small, 3600),          // fresh
        ];

        let policy = TtlEvictionPolicy;
        let selected = policy.select(&entries, usize::MAX);
        assert_eq!(selected.len(), 1);
        assert!(selected.contains(&entries[0].id));
    }

    #[test]
    fn test_ttl_prefers_oldest_when_over_target() {
        let oldest = aged(entry(ModelTier::Small, 3600), 10);
        let older = aged(entry(ModelTier::Small, 3600), 5);
        let old = aged(entry(ModelTier::Small, 3600), 2);
        let entries = vec![old.clone(), oldest.clone(), older.clone()];

        let selected = TtlEvictionPolicy.select(&entries, 2);
        assert_eq!(selected.len(), 2);
        assert!(selected.contains(&oldest.id));
        assert!(selected.contains(&older.id));
        assert!(!selected.contains(&old.id));
    }

    #[test]
    fn test_lru_picks_least_recently_used() {
        let mut recently_used = entry(ModelTier::Small, 86400);
        recently_used.record_hit();
        let untouched = aged(entry(ModelTier::Small, 86400), 3);
        let entries = vec![recently_used.clone(), untouched.clone()];

        let selected = LruEvictionPolicy.select(&entries, 1);
        assert_eq!(selected.len(), 1);
        assert!(selected.contains(&untouched.id));
    }

    #[test]
    fn test_quality_score_components() {
        // Fresh, hot, large-model entry scores near the top
        let mut hot = entry(ModelTier::Large, 86400);
        hot.hit_count = 10;
        let score = QualityEvictionPolicy::quality_score(&hot);
        assert!((score - 1.0).abs() < 1e-9);

        // Old, cold, small-model entry scores near the bottom
        let cold = aged(entry(ModelTier::Small, 86400 * 30), 24 * 10);
        let score = QualityEvictionPolicy::quality_score(&cold);
        assert!((score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_quality_selects_lowest_scored() {
        let mut valuable = entry(ModelTier::Large, 86400);
        valuable.hit_count = 8;
        let disposable = entry(ModelTier::Small, 86400);
        let entries = vec![valuable.clone(), disposable.clone()];

        let selected = QualityEvictionPolicy.select(&entries, 1);
        assert!(selected.contains(&disposable.id));
        assert!(!selected.contains(&valuable.id));
    }

    #[test]
    fn test_composite_removes_all_expired_first() {
        let expired_a = aged(entry(ModelTier::Large, 3600), 2);
        let expired_b = aged(entry(ModelTier::Large, 3600), 3);
        let fresh = entry(ModelTier::Small, 86400);
        let entries = vec![expired_a.clone(), expired_b.clone(), fresh.clone()];

        // Target of 1 still removes both expired entries
        let selected = CompositeEvictionPolicy::new().select(&entries, 1);
        assert!(selected.contains(&expired_a.id));
        assert!(selected.contains(&expired_b.id));
        assert!(!selected.contains(&fresh.id));
    }

    #[test]
    fn test_composite_fills_target_with_low_quality() {
        let expired = aged(entry(ModelTier::Small, 3600), 2);
        let mut valuable = entry(ModelTier::Large, 86400);
        valuable.hit_count = 10;
        let disposable = entry(ModelTier::Small, 86400);
        let entries = vec![expired.clone(), valuable.clone(), disposable.clone()];

        let selected = CompositeEvictionPolicy::new().select(&entries, 2);
        assert_eq!(selected.len(), 2);
        assert!(selected.contains(&expired.id));
        assert!(selected.contains(&disposable.id));
        assert!(!selected.contains(&valuable.id));
    }

    #[test]
    fn test_composite_never_retains_unanimous_eviction() {
        // An entry every sub-policy would evict must be in the composite set
        let doomed = aged(entry(ModelTier::Small, 3600), 24 * 10);
        let mut keeper = entry(ModelTier::Large, 86400 * 30);
        keeper.hit_count = 10;
        keeper.record_hit();
        let entries = vec![doomed.clone(), keeper.clone()];

        let target = 1;
        let by_ttl = TtlEvictionPolicy.select(&entries, target);
        let by_quality = QualityEvictionPolicy.select(&entries, target);
        let by_lru = LruEvictionPolicy.select(&entries, target);
        assert!(by_ttl.contains(&doomed.id));
        assert!(by_quality.contains(&doomed.id));
        assert!(by_lru.contains(&doomed.id));

        let composite = CompositeEvictionPolicy::new().select(&entries, target);
        assert!(composite.contains(&doomed.id));
    }
}

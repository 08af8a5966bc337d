//! Counters for the pool, the snapshot cache and the fanout.
//!
//! Each component owns an `Arc` of its counters and bumps them with relaxed
//! atomics; `snapshot()` produces a plain copy for metrics export.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

fn ratio(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// ============================================================================
// POOL
// ============================================================================

#[derive(Debug, Default)]
pub struct PoolStats {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    failures: AtomicU64,
    opened: AtomicU64,
    disposed: AtomicU64,
    dispose_failures: AtomicU64,
    evicted_capacity: AtomicU64,
    evicted_idle: AtomicU64,
    removed_explicit: AtomicU64,
    superseded: AtomicU64,
}

impl PoolStats {
    pub(crate) fn record_hit(&self) {
        bump(&self.hits);
    }

    pub(crate) fn record_miss(&self) {
        bump(&self.misses);
    }

    pub(crate) fn record_joined(&self) {
        bump(&self.joined);
    }

    pub(crate) fn record_failure(&self) {
        bump(&self.failures);
    }

    pub(crate) fn record_opened(&self) {
        bump(&self.opened);
    }

    pub(crate) fn record_disposed(&self) {
        bump(&self.disposed);
    }

    pub(crate) fn record_dispose_failure(&self) {
        bump(&self.dispose_failures);
    }

    pub(crate) fn record_evicted_capacity(&self) {
        bump(&self.evicted_capacity);
    }

    pub(crate) fn record_evicted_idle(&self) {
        bump(&self.evicted_idle);
    }

    pub(crate) fn record_removed_explicit(&self) {
        bump(&self.removed_explicit);
    }

    pub(crate) fn record_superseded(&self) {
        bump(&self.superseded);
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            hits: read(&self.hits),
            misses: read(&self.misses),
            joined: read(&self.joined),
            failures: read(&self.failures),
            opened: read(&self.opened),
            disposed: read(&self.disposed),
            dispose_failures: read(&self.dispose_failures),
            evicted_capacity: read(&self.evicted_capacity),
            evicted_idle: read(&self.evicted_idle),
            removed_explicit: read(&self.removed_explicit),
            superseded: read(&self.superseded),
        }
    }
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Resolves answered from the pool.
    pub hits: u64,
    /// Resolves that started a new creation.
    pub misses: u64,
    /// Resolves that awaited a creation started by another caller.
    pub joined: u64,
    /// Creations that ended in an error.
    pub failures: u64,
    pub opened: u64,
    pub disposed: u64,
    pub dispose_failures: u64,
    pub evicted_capacity: u64,
    pub evicted_idle: u64,
    pub removed_explicit: u64,
    /// Creations that finished after being invalidated and were not pooled.
    pub superseded: u64,
}

impl PoolStatsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses + self.joined)
    }
}

// ============================================================================
// SNAPSHOT CACHE
// ============================================================================

#[derive(Debug, Default)]
pub struct SnapshotStats {
    near_hits: AtomicU64,
    shared_hits: AtomicU64,
    store_reads: AtomicU64,
    not_found: AtomicU64,
    degraded: AtomicU64,
}

impl SnapshotStats {
    pub(crate) fn record_near_hit(&self) {
        bump(&self.near_hits);
    }

    pub(crate) fn record_shared_hit(&self) {
        bump(&self.shared_hits);
    }

    pub(crate) fn record_store_read(&self) {
        bump(&self.store_reads);
    }

    pub(crate) fn record_not_found(&self) {
        bump(&self.not_found);
    }

    pub(crate) fn record_degraded(&self) {
        bump(&self.degraded);
    }

    pub fn snapshot(&self) -> SnapshotStatsSnapshot {
        SnapshotStatsSnapshot {
            near_hits: read(&self.near_hits),
            shared_hits: read(&self.shared_hits),
            store_reads: read(&self.store_reads),
            not_found: read(&self.not_found),
            degraded: read(&self.degraded),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStatsSnapshot {
    pub near_hits: u64,
    pub shared_hits: u64,
    /// Reads that went to the metadata store, including degraded ones.
    pub store_reads: u64,
    pub not_found: u64,
    /// Reads served straight from the store because the shared cache failed.
    pub degraded: u64,
}

impl SnapshotStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.near_hits + self.shared_hits;
        ratio(hits, hits + self.store_reads)
    }
}

// ============================================================================
// FANOUT
// ============================================================================

#[derive(Debug, Default)]
pub struct FanoutStats {
    published: AtomicU64,
    publish_failures: AtomicU64,
    received: AtomicU64,
    ignored_own: AtomicU64,
    malformed: AtomicU64,
    reconnects: AtomicU64,
}

impl FanoutStats {
    pub(crate) fn record_published(&self) {
        bump(&self.published);
    }

    pub(crate) fn record_publish_failure(&self) {
        bump(&self.publish_failures);
    }

    pub(crate) fn record_received(&self) {
        bump(&self.received);
    }

    pub(crate) fn record_ignored_own(&self) {
        bump(&self.ignored_own);
    }

    pub(crate) fn record_malformed(&self) {
        bump(&self.malformed);
    }

    pub(crate) fn record_reconnect(&self) {
        bump(&self.reconnects);
    }

    pub fn snapshot(&self) -> FanoutStatsSnapshot {
        FanoutStatsSnapshot {
            published: read(&self.published),
            publish_failures: read(&self.publish_failures),
            received: read(&self.received),
            ignored_own: read(&self.ignored_own),
            malformed: read(&self.malformed),
            reconnects: read(&self.reconnects),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanoutStatsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    /// Events from other processes that were applied locally.
    pub received: u64,
    pub ignored_own: u64,
    pub malformed: u64,
    pub reconnects: u64,
}

/// Everything the resolver counts, for `/metrics` and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolverStats {
    pub pool: PoolStatsSnapshot,
    pub pooled_connections: u64,
    pub in_flight: u64,
    pub cached_locators: u64,
    pub snapshots: SnapshotStatsSnapshot,
    pub fanout: FanoutStatsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_hit_rate() {
        let stats = PoolStats::default();
        assert_eq!(stats.snapshot().hit_rate(), 0.0);
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_hit_rate_counts_both_tiers() {
        let stats = SnapshotStats::default();
        stats.record_near_hit();
        stats.record_shared_hit();
        stats.record_store_read();
        stats.record_store_read();
        assert!((stats.snapshot().hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}

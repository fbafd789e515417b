//! Sync engine counters.
//!
//! Each counter is individually atomic; a snapshot is consistent per
//! counter, not across counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;

#[derive(Default)]
pub(crate) struct SyncStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    write_through: AtomicU64,
    write_behind: AtomicU64,
    sync_failures: AtomicU64,
    /// Unix milliseconds of the last completed flush; 0 = never flushed.
    last_flush_ms: AtomicI64,
}

impl SyncStats {
    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_through(&self) {
        self.write_through.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_behind(&self) {
        self.write_behind.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, at: OffsetDateTime) {
        let ms = (at.unix_timestamp_nanos() / 1_000_000) as i64;
        self.last_flush_ms.store(ms, Ordering::Release);
    }

    pub fn snapshot(&self, pending_count: usize) -> SyncStatsSnapshot {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        let last_flush_ms = self.last_flush_ms.load(Ordering::Acquire);
        let last_flush_time = (last_flush_ms != 0)
            .then(|| OffsetDateTime::from_unix_timestamp_nanos(last_flush_ms as i128 * 1_000_000).ok())
            .flatten();

        SyncStatsSnapshot {
            cache_hits: hits,
            cache_misses: misses,
            write_through_count: self.write_through.load(Ordering::Relaxed),
            write_behind_count: self.write_behind.load(Ordering::Relaxed),
            sync_failure_count: self.sync_failures.load(Ordering::Relaxed),
            hit_rate,
            pending_count,
            last_flush_time,
        }
    }
}

/// Value snapshot of the sync counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub write_through_count: u64,
    pub write_behind_count: u64,
    pub sync_failure_count: u64,
    /// `hits / (hits + misses)`, 0 when there were no lookups.
    pub hit_rate: f64,
    pub pending_count: usize,
    pub last_flush_time: Option<OffsetDateTime>,
}

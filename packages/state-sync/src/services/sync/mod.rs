//! Data sync engine: the three coherence strategies between the cache and
//! the durable store.
//!
//! - **Write-Through** updates cache and store before returning.
//! - **Write-Behind** updates the cache and queues the store write; a
//!   background task drains the queue in batches.
//! - **Cache-Aside** reads through the cache and backfills it on miss.
//!
//! The cache is authoritative for a key while its write-behind entry is
//! still queued; persistence catches up at the next flush.

mod pending;
pub mod stats;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::infra::cache::CacheBackend;
use crate::persistence::StateStore;
use pending::{FailOutcome, PendingQueue};
pub use stats::SyncStatsSnapshot;
use stats::SyncStats;

/// Most recent dead-lettered writes kept for inspection.
const DEAD_LETTER_CAPACITY: usize = 128;

/// A pending write whose retry budget ran out. Also emitted as an error
/// log record at the moment it is dropped.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub key: String,
    pub payload: Bytes,
    pub ttl: Option<Duration>,
    pub retries: u32,
    pub enqueued_at: OffsetDateTime,
    pub dropped_at: OffsetDateTime,
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

struct SyncEngineInner {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn StateStore>,
    settings: SyncSettings,
    pending: parking_lot::Mutex<PendingQueue>,
    dead_letters: parking_lot::Mutex<VecDeque<DeadLetter>>,
    stats: SyncStats,
    /// Serializes flush passes so the timer and a threshold nudge cannot
    /// double-persist the same snapshot.
    flush_gate: tokio::sync::Mutex<()>,
    flush_nudge: Notify,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

#[derive(Clone)]
pub struct DataSyncEngine {
    inner: Arc<SyncEngineInner>,
    flusher: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl DataSyncEngine {
    /// Spawns the background flusher, so this must be called from within a
    /// tokio runtime.
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn StateStore>,
        settings: SyncSettings,
    ) -> Self {
        let inner = Arc::new(SyncEngineInner {
            cache,
            store,
            settings,
            pending: parking_lot::Mutex::new(PendingQueue::default()),
            dead_letters: parking_lot::Mutex::new(VecDeque::new()),
            stats: SyncStats::default(),
            flush_gate: tokio::sync::Mutex::new(()),
            flush_nudge: Notify::new(),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        });
        let flusher = spawn_flusher(&inner);
        Self {
            inner,
            flusher: Arc::new(parking_lot::Mutex::new(Some(flusher))),
        }
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(SyncError::disposed("sync engine"));
        }
        Ok(())
    }

    /// Synchronous write to cache and store. The first failing step
    /// surfaces; a cache entry orphaned by a store failure is best-effort
    /// invalidated so reads re-converge through the loader.
    pub async fn write_through<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), SyncError> {
        self.ensure_open()?;
        let inner = &self.inner;
        let payload = serde_json::to_vec(value)?;

        if let Err(err) = inner.cache.set(key, &payload, ttl).await {
            inner.stats.record_failure();
            warn!(key, error = %err, "write-through cache write failed");
            return Err(err);
        }

        if let Err(err) = inner.store.save(key, &payload).await {
            inner.stats.record_failure();
            warn!(key, error = %err, "write-through persistence failed, invalidating cache entry");
            if let Err(del_err) = inner.cache.del(key).await {
                warn!(key, error = %del_err, "cache invalidation after failed write-through also failed");
            }
            return Err(err);
        }

        inner.stats.record_write_through();
        Ok(())
    }

    /// Write to the cache now, persist later. Cache failure surfaces
    /// immediately and nothing is queued; persistence failures are handled
    /// by the flusher's retry budget.
    pub async fn write_behind<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), SyncError> {
        self.ensure_open()?;
        let inner = &self.inner;
        let payload = Bytes::from(serde_json::to_vec(value)?);

        inner.cache.set(key, &payload, ttl).await?;

        let pending = inner.pending.lock().upsert(key, payload, ttl);
        inner.stats.record_write_behind();
        debug!(key, pending, "write queued for background persistence");

        if pending >= inner.settings.batch_threshold {
            inner.flush_nudge.notify_one();
        }
        Ok(())
    }

    /// Read through the cache; on miss, load from the caller's source and
    /// backfill. Loader errors propagate unchanged and never touch the
    /// cache; cache errors degrade to the miss path.
    pub async fn cache_aside<T, L, Fut>(&self, key: &str, loader: L) -> Result<Option<T>, SyncError>
    where
        T: Serialize + DeserializeOwned,
        L: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, SyncError>>,
    {
        self.ensure_open()?;
        let inner = &self.inner;

        match inner.cache.get(key).await {
            Ok(Some(bytes)) => {
                let value = serde_json::from_slice(&bytes)?;
                inner.stats.record_hit();
                return Ok(Some(value));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(key, error = %err, "cache read failed, falling back to loader");
            }
        }
        inner.stats.record_miss();

        let Some(value) = loader().await? else {
            return Ok(None);
        };

        match serde_json::to_vec(&value) {
            Ok(payload) => {
                if let Err(err) = inner.cache.set(key, &payload, None).await {
                    warn!(key, error = %err, "cache backfill failed after load");
                }
            }
            Err(err) => {
                warn!(key, error = %err, "loaded value could not be encoded for backfill");
            }
        }
        Ok(Some(value))
    }

    /// Remove a key everywhere: the pending queue first (so a stale queued
    /// write cannot resurrect it), then cache, then store. Every step runs;
    /// the first failure, if any, is returned afterwards.
    pub async fn delete(&self, key: &str) -> Result<(), SyncError> {
        self.ensure_open()?;
        let inner = &self.inner;

        if inner.pending.lock().remove(key) {
            debug!(key, "pending write discarded by delete");
        }

        let mut first_err = None;
        if let Err(err) = inner.cache.del(key).await {
            warn!(key, error = %err, "cache delete failed");
            first_err = Some(err);
        }
        if let Err(err) = inner.store.delete(key).await {
            warn!(key, error = %err, "persistence delete failed");
            first_err.get_or_insert(err);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drain up to one batch of pending writes to the store.
    pub async fn flush_pending_writes(&self) -> Result<FlushReport, SyncError> {
        self.ensure_open()?;
        Ok(flush_once(&self.inner).await)
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        let pending = self.inner.pending.lock().len();
        self.inner.stats.snapshot(pending)
    }

    /// Recently dead-lettered writes, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Stops the flusher after one final drain. Idempotent; public
    /// operations fail with `Disposed` afterwards.
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();
        let task = self.flusher.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let left = self.inner.pending.lock().len();
        if left > 0 {
            warn!(pending = left, "sync engine shut down with writes still pending");
        } else {
            info!("sync engine shut down");
        }
    }
}

/// One serialized flush pass. The snapshot is taken under the queue lock,
/// which is released before any store call; entries that a newer write
/// superseded mid-flight are left to the next pass.
async fn flush_once(inner: &Arc<SyncEngineInner>) -> FlushReport {
    let _gate = inner.flush_gate.lock().await;

    let batch = inner
        .pending
        .lock()
        .snapshot(inner.settings.write_behind_batch_size);
    if batch.is_empty() {
        return FlushReport::default();
    }

    debug!(count = batch.len(), "flush starting");
    let mut report = FlushReport::default();

    for (key, entry) in batch {
        match inner.store.save(&key, &entry.payload).await {
            Ok(_) => {
                inner.pending.lock().complete(&key, entry.seq);
                report.flushed += 1;
            }
            Err(err) => {
                warn!(key = %key, retries = entry.retries + 1, error = %err, "pending write flush failed");
                let outcome =
                    inner
                        .pending
                        .lock()
                        .fail(&key, entry.seq, inner.settings.max_retries);
                match outcome {
                    FailOutcome::Retained => report.retried += 1,
                    FailOutcome::DeadLettered(write) => {
                        error!(
                            key = %key,
                            retries = write.retries,
                            "pending write exhausted its retry budget, dead-lettered"
                        );
                        inner.stats.record_failure();
                        report.dead_lettered += 1;
                        let mut letters = inner.dead_letters.lock();
                        if letters.len() == DEAD_LETTER_CAPACITY {
                            letters.pop_front();
                        }
                        letters.push_back(DeadLetter {
                            key: key.clone(),
                            payload: write.payload,
                            ttl: write.ttl,
                            retries: write.retries,
                            enqueued_at: write.enqueued_at,
                            dropped_at: OffsetDateTime::now_utc(),
                        });
                    }
                    FailOutcome::Superseded => {}
                }
            }
        }
    }

    inner.stats.record_flush(OffsetDateTime::now_utc());
    let pending = inner.pending.lock().len();
    debug!(
        flushed = report.flushed,
        retried = report.retried,
        dead_lettered = report.dead_lettered,
        pending,
        "flush finished"
    );
    report
}

fn spawn_flusher(inner: &Arc<SyncEngineInner>) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    let token = inner.shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(inner.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = inner.flush_nudge.notified() => {}
            }
            flush_once(&inner).await;
        }

        // Final drain; loops in case more than one batch is queued.
        loop {
            let report = flush_once(&inner).await;
            if report.flushed == 0 && report.dead_lettered == 0 {
                break;
            }
        }
    })
}

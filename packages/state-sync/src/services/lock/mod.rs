//! Distributed lock service.
//!
//! Mutual exclusion across processes is carried by a single cache key per
//! resource: `SET key token NX PX` acquires, a conditional server-side
//! delete releases, a conditional expire renews. The token is unique per
//! acquisition, so only the holder can release or renew — a stale process
//! cannot clobber a lock that moved on without it. TTL is the safety net
//! for crashed holders.
//!
//! `try_acquire` never returns an error: contention, timeout, and transport
//! failure all collapse to `None`, and callers decide how to proceed.

pub mod handle;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LockSettings;
use crate::infra::cache::CacheBackend;

pub use handle::LockHandle;

/// Bounded wait for releasing all held locks at shutdown; anything left
/// over expires via TTL.
const SHUTDOWN_RELEASE_WAIT: Duration = Duration::from_secs(10);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(0);
thread_local! {
    static WORKER_ID: u64 = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
}

/// `{host}:{pid}:{worker}:{random}` — the random suffix carries the
/// fencing guarantee, the prefix identifies the holder in diagnostics.
fn lock_token() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let worker = WORKER_ID.with(|id| *id);
    format!(
        "{host}:{pid}:{worker}:{random}",
        pid = std::process::id(),
        random = Uuid::new_v4().simple()
    )
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// One lock this process believes it holds.
pub(crate) struct ActiveLock {
    pub(crate) resource: String,
    pub(crate) token: String,
    pub(crate) acquired_at: OffsetDateTime,
    pub(crate) total_expiry: Duration,
    /// Unix milliseconds; written atomically on renewal.
    expiry_at_ms: AtomicI64,
}

impl ActiveLock {
    fn new(resource: String, token: String, expiry: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            resource,
            token,
            acquired_at: now,
            total_expiry: expiry,
            expiry_at_ms: AtomicI64::new(unix_millis(now) + expiry.as_millis() as i64),
        }
    }

    pub(crate) fn expiry_time(&self) -> OffsetDateTime {
        let ms = self.expiry_at_ms.load(Ordering::Acquire);
        OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    pub(crate) fn remaining(&self) -> Duration {
        let now = unix_millis(OffsetDateTime::now_utc());
        let left = self.expiry_at_ms.load(Ordering::Acquire) - now;
        if left <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(left as u64)
        }
    }

    fn extend(&self, expiry: Duration) {
        let at = unix_millis(OffsetDateTime::now_utc()) + expiry.as_millis() as i64;
        self.expiry_at_ms.store(at, Ordering::Release);
    }
}

#[derive(Default)]
pub(crate) struct LockStats {
    acquired: AtomicU64,
    released: AtomicU64,
    timeouts: AtomicU64,
    renewals: AtomicU64,
}

/// Value snapshot of the lock counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockStatsSnapshot {
    pub acquired_count: u64,
    pub released_count: u64,
    pub timeout_count: u64,
    pub renewal_count: u64,
}

pub(crate) struct LockServiceInner {
    pub(crate) settings: LockSettings,
    pub(crate) cache: Arc<dyn CacheBackend>,
    pub(crate) registry: DashMap<String, Arc<ActiveLock>>,
    pub(crate) stats: LockStats,
    disposed: AtomicBool,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct DistributedLockService {
    inner: Arc<LockServiceInner>,
    renewal_task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl DistributedLockService {
    /// Spawns the auto-renewal loop when enabled, so this must be called
    /// from within a tokio runtime.
    pub fn new(cache: Arc<dyn CacheBackend>, settings: LockSettings) -> Self {
        let inner = Arc::new(LockServiceInner {
            settings,
            cache,
            registry: DashMap::new(),
            stats: LockStats::default(),
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let renewal_task = if inner.settings.enable_auto_renewal {
            Some(spawn_renewal_loop(&inner))
        } else {
            None
        };

        Self {
            inner,
            renewal_task: Arc::new(parking_lot::Mutex::new(renewal_task)),
        }
    }

    /// Try to take the lock for `resource`, retrying until `timeout`
    /// elapses. `None` on contention past the deadline, on transport
    /// failure, and after shutdown — never an error.
    ///
    /// A zero timeout attempts exactly one `SET`.
    pub async fn try_acquire(
        &self,
        resource: &str,
        expiry: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Option<LockHandle> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::Acquire) {
            warn!(resource, "lock acquire refused, service is shut down");
            return None;
        }

        let expiry = expiry.unwrap_or(inner.settings.default_expiry);
        let timeout = timeout.unwrap_or(inner.settings.default_timeout);
        let key = format!("{}{}", inner.settings.key_prefix, resource);
        let token = lock_token();
        let deadline = Instant::now() + timeout;

        loop {
            match inner.cache.set_nx_px(&key, token.as_bytes(), expiry).await {
                Ok(true) => {
                    let lock = Arc::new(ActiveLock::new(
                        resource.to_string(),
                        token.clone(),
                        expiry,
                    ));
                    inner.registry.insert(key.clone(), lock);
                    inner.stats.acquired.fetch_add(1, Ordering::Relaxed);
                    debug!(resource, "lock acquired");
                    return Some(LockHandle::new(
                        resource.to_string(),
                        key,
                        token,
                        Arc::downgrade(inner),
                    ));
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(resource, error = %err, "lock acquire failed on transport error");
                    return None;
                }
            }

            // The deadline is honored precisely: once it passes, no further
            // SET is attempted even if it would have succeeded.
            let now = Instant::now();
            if now >= deadline {
                inner.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(resource, "lock acquire timed out");
                return None;
            }
            let wait = inner.settings.retry_interval.min(deadline - now);
            sleep(wait).await;
            if Instant::now() >= deadline {
                inner.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(resource, "lock acquire timed out");
                return None;
            }
        }
    }

    /// Renew the lock this process holds on `resource`. False when the
    /// lock is not held here, ownership moved, or the cache call failed.
    pub async fn renew(&self, resource: &str, expiry: Option<Duration>) -> bool {
        let key = format!("{}{}", self.inner.settings.key_prefix, resource);
        LockServiceInner::renew_key(&self.inner, &key, None, expiry).await
    }

    /// Number of locks this process currently believes it holds.
    pub fn active_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn stats(&self) -> LockStatsSnapshot {
        let stats = &self.inner.stats;
        LockStatsSnapshot {
            acquired_count: stats.acquired.load(Ordering::Relaxed),
            released_count: stats.released.load(Ordering::Relaxed),
            timeout_count: stats.timeouts.load(Ordering::Relaxed),
            renewal_count: stats.renewals.load(Ordering::Relaxed),
        }
    }

    /// Best-effort release of everything still held, bounded by
    /// [`SHUTDOWN_RELEASE_WAIT`]; leftovers expire via TTL. Idempotent.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.shutdown.cancel();
        let task = self.renewal_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let keys: Vec<String> = inner.registry.iter().map(|e| e.key().clone()).collect();
        if !keys.is_empty() {
            info!(count = keys.len(), "releasing active locks on shutdown");
            let releases = keys
                .iter()
                .map(|key| LockServiceInner::release_key(inner, key, None));
            if tokio::time::timeout(SHUTDOWN_RELEASE_WAIT, join_all(releases))
                .await
                .is_err()
            {
                warn!("lock release did not finish before the shutdown deadline; TTL reclaims the rest");
            }
        }
        inner.registry.clear();
        info!("lock service shut down");
    }
}

impl LockServiceInner {
    /// Conditional-expire the registry entry under `key`. When `expected`
    /// is given, the entry must carry that exact token (handle renewals
    /// must not touch a newer acquisition of the same resource).
    pub(crate) async fn renew_key(
        inner: &Arc<Self>,
        key: &str,
        expected: Option<&str>,
        expiry: Option<Duration>,
    ) -> bool {
        let entry = match inner.registry.get(key) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        if let Some(expected) = expected {
            if entry.token != expected {
                return false;
            }
        }

        let expiry = expiry.unwrap_or(entry.total_expiry);
        match inner.cache.expire_if_match(key, &entry.token, expiry).await {
            Ok(true) => {
                entry.extend(expiry);
                inner.stats.renewals.fetch_add(1, Ordering::Relaxed);
                debug!(resource = %entry.resource, expiry_secs = expiry.as_secs(), "lock renewed");
                true
            }
            Ok(false) => {
                warn!(resource = %entry.resource, "lock renewal refused, ownership lost");
                inner.registry.remove_if(key, |_, v| Arc::ptr_eq(v, &entry));
                false
            }
            Err(err) => {
                warn!(resource = %entry.resource, error = %err, "lock renewal failed");
                false
            }
        }
    }

    /// Conditional-delete the registry entry under `key`. The registry
    /// entry is removed regardless of the cache outcome — once a caller
    /// releases, this process no longer claims the lock, and the cache key
    /// falls back to its TTL if the delete could not be confirmed.
    pub(crate) async fn release_key(
        inner: &Arc<Self>,
        key: &str,
        expected: Option<&str>,
    ) -> bool {
        let entry = match inner.registry.get(key) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        if let Some(expected) = expected {
            if entry.token != expected {
                return false;
            }
        }
        inner.registry.remove_if(key, |_, v| Arc::ptr_eq(v, &entry));

        match inner.cache.del_if_match(key, &entry.token).await {
            Ok(true) => {
                inner.stats.released.fetch_add(1, Ordering::Relaxed);
                let held = OffsetDateTime::now_utc() - entry.acquired_at;
                debug!(
                    resource = %entry.resource,
                    held_ms = held.whole_milliseconds() as i64,
                    "lock released"
                );
                true
            }
            Ok(false) => {
                warn!(resource = %entry.resource, "lock already expired or stolen at release");
                false
            }
            Err(err) => {
                warn!(resource = %entry.resource, error = %err, "lock release failed");
                false
            }
        }
    }
}

fn spawn_renewal_loop(inner: &Arc<LockServiceInner>) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    let token = inner.shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(inner.settings.renewal_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A lock is due once its remaining TTL falls inside the renewal
            // window (total expiry scaled by the configured ratio).
            let due: Vec<String> = inner
                .registry
                .iter()
                .filter(|entry| {
                    let lock = entry.value();
                    lock.remaining() <= lock.total_expiry.mul_f64(inner.settings.auto_renewal_ratio)
                })
                .map(|entry| entry.key().clone())
                .collect();

            if due.is_empty() {
                continue;
            }
            debug!(count = due.len(), "renewing locks nearing expiry");
            join_all(
                due.iter()
                    .map(|key| LockServiceInner::renew_key(&inner, key, None, None)),
            )
            .await;
        }
    })
}

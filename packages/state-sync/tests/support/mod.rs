//! Shared harness for the integration suites: instrumented cache and store
//! doubles built on the in-process backends.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use state_sync::{
    CacheBackend, DataSyncEngine, DistributedLockService, LockSettings, MemoryCache,
    MemoryDocumentStore, StateStore, SyncError, SyncSettings,
};

#[ctor::ctor]
fn init_test_logging() {
    sync_test_support::logging::init();
}

/// Cache wrapper that counts calls per primitive.
#[derive(Default)]
pub struct CountingCache {
    pub inner: MemoryCache,
    pub set_nx_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
}

#[async_trait]
impl CacheBackend for CountingCache {
    async fn ping(&self) -> Result<(), SyncError> {
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), SyncError> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, SyncError> {
        self.set_nx_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.set_nx_px(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<bool, SyncError> {
        self.inner.del(key).await
    }

    async fn del_if_match(&self, key: &str, token: &str) -> Result<bool, SyncError> {
        self.inner.del_if_match(key, token).await
    }

    async fn expire_if_match(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        self.inner.expire_if_match(key, token, ttl).await
    }
}

/// Cache wrapper whose next N `set` calls fail with a transport error.
#[derive(Default)]
pub struct FlakyCache {
    pub inner: MemoryCache,
    pub failing_sets: AtomicU32,
}

impl FlakyCache {
    pub fn fail_next_sets(&self, count: u32) {
        self.failing_sets.store(count, Ordering::Relaxed);
    }

    fn take_failure(&self) -> bool {
        self.failing_sets
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                left.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl CacheBackend for FlakyCache {
    async fn ping(&self) -> Result<(), SyncError> {
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), SyncError> {
        if self.take_failure() {
            return Err(SyncError::transport("injected cache set failure"));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, SyncError> {
        self.inner.set_nx_px(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<bool, SyncError> {
        self.inner.del(key).await
    }

    async fn del_if_match(&self, key: &str, token: &str) -> Result<bool, SyncError> {
        self.inner.del_if_match(key, token).await
    }

    async fn expire_if_match(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        self.inner.expire_if_match(key, token, ttl).await
    }
}

/// Store wrapper whose next N `save` calls are rejected.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryDocumentStore,
    pub failing_saves: AtomicU32,
    pub save_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::Relaxed);
    }

    fn take_failure(&self) -> bool {
        self.failing_saves
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                left.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn save(&self, key: &str, payload: &[u8]) -> Result<String, SyncError> {
        self.save_calls.fetch_add(1, Ordering::Relaxed);
        if self.take_failure() {
            return Err(SyncError::persistence("injected save failure"));
        }
        self.inner.save(key, payload).await
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        self.inner.load(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, SyncError> {
        self.inner.delete(key).await
    }

    async fn batch_save(&self, items: &[(String, Bytes)]) -> Result<Vec<String>, SyncError> {
        self.inner.batch_save(items).await
    }
}

/// Lock settings tuned for fast suites: short retry interval, no renewal
/// loop unless a test opts in.
pub fn fast_lock_settings() -> LockSettings {
    LockSettings {
        default_expiry: Duration::from_secs(30),
        default_timeout: Duration::from_secs(2),
        retry_interval: Duration::from_millis(20),
        enable_auto_renewal: false,
        ..Default::default()
    }
}

/// Sync settings with a timer too slow to interfere; tests flush manually
/// or via the threshold.
pub fn manual_flush_settings() -> SyncSettings {
    SyncSettings {
        write_behind_batch_size: 64,
        flush_interval: Duration::from_secs(600),
        batch_threshold: 1_000,
        max_retries: 3,
    }
}

pub fn lock_service(cache: Arc<dyn CacheBackend>) -> DistributedLockService {
    DistributedLockService::new(cache, fast_lock_settings())
}

pub fn sync_engine(
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn StateStore>,
    settings: SyncSettings,
) -> DataSyncEngine {
    DataSyncEngine::new(cache, store, settings)
}

//! Runtime assembly: settings → connection manager → cache backend → lock
//! service + sync engine, with ordered teardown.

use std::sync::Arc;

use tracing::info;

use crate::config::Settings;
use crate::error::SyncError;
use crate::infra::cache::{CacheBackend, CacheConnectionManager, RedisCache};
use crate::persistence::StateStore;
use crate::services::lock::DistributedLockService;
use crate::services::sync::DataSyncEngine;

/// The assembled state-sync stack. Shared by value (`Clone` is cheap);
/// call [`shutdown`](Self::shutdown) exactly once when the process exits.
#[derive(Clone)]
pub struct SyncRuntime {
    manager: Option<Arc<CacheConnectionManager>>,
    cache: Arc<dyn CacheBackend>,
    locks: DistributedLockService,
    sync: DataSyncEngine,
}

impl SyncRuntime {
    pub fn locks(&self) -> &DistributedLockService {
        &self.locks
    }

    pub fn sync(&self) -> &DataSyncEngine {
        &self.sync
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    /// Present unless the runtime was built over a caller-provided backend.
    pub fn connection_manager(&self) -> Option<&Arc<CacheConnectionManager>> {
        self.manager.as_ref()
    }

    /// Ordered teardown: locks release first (bounded), the sync engine
    /// drains its queue, the connection manager closes last.
    pub async fn shutdown(&self) {
        self.locks.shutdown().await;
        self.sync.shutdown().await;
        if let Some(manager) = &self.manager {
            manager.shutdown().await;
        }
        info!("state-sync runtime shut down");
    }
}

/// Builder for [`SyncRuntime`] (used by both binaries and tests).
pub struct RuntimeBuilder {
    settings: Settings,
    cache: Option<Arc<dyn CacheBackend>>,
    store: Option<Arc<dyn StateStore>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            cache: None,
            store: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the cache backend (tests, single-node deployments). The
    /// connection manager is not built in this case.
    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Result<SyncRuntime, SyncError> {
        let store = self
            .store
            .ok_or_else(|| SyncError::config("a state store is required; pass with_store(...)"))?;

        self.settings.lock.validate()?;
        self.settings.sync.validate()?;

        let (cache, manager) = match self.cache {
            Some(cache) => (cache, None),
            None => {
                let manager = CacheConnectionManager::new(self.settings.cache.clone())?;
                let cache: Arc<dyn CacheBackend> = Arc::new(RedisCache::new(manager.clone()));
                (cache, Some(manager))
            }
        };

        let locks = DistributedLockService::new(cache.clone(), self.settings.lock.clone());
        let sync = DataSyncEngine::new(cache.clone(), store, self.settings.sync.clone());

        Ok(SyncRuntime {
            manager,
            cache,
            locks,
            sync,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new runtime builder.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use state_sync::{build_runtime, MemoryDocumentStore, Settings};
///
/// # async fn example() -> Result<(), state_sync::SyncError> {
/// let runtime = build_runtime()
///     .with_settings(Settings::from_env()?)
///     .with_store(Arc::new(MemoryDocumentStore::new()))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub fn build_runtime() -> RuntimeBuilder {
    RuntimeBuilder::new()
}

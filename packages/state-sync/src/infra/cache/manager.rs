//! Shared cache connection manager.
//!
//! One process holds a single cache client, multiplexed across logical
//! databases. Reads of the published client are lock-free; rebuilds go
//! through a single-writer critical section with a double-check, the same
//! shape as the shared pool cache this codebase uses for its SQL side.
//! A periodic health check only *invalidates* a broken connection; the
//! rebuild happens on the next demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Client;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CacheSettings;
use crate::error::SyncError;

pub struct CacheConnectionManager {
    settings: CacheSettings,
    /// Published client; `None` while torn down or invalidated.
    client: RwLock<Option<Client>>,
    /// Single-writer section for building/replacing the client.
    rebuild: Mutex<()>,
    /// Per-database handles, derived from the current client generation.
    databases: DashMap<i64, ConnectionManager>,
    db_init_locks: DashMap<i64, Arc<Mutex<()>>>,
    /// Advances on every build attempt so a dead endpoint is not retried
    /// forever when alternatives are configured.
    endpoint_cursor: AtomicUsize,
    healthy: AtomicBool,
    had_failure: AtomicBool,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    health_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CacheConnectionManager {
    /// Validate settings and create the manager. The connection itself is
    /// built lazily on first use. Spawns the health-check loop when enabled,
    /// so this must be called from within a tokio runtime.
    pub fn new(settings: CacheSettings) -> Result<Arc<Self>, SyncError> {
        settings.validate()?;
        let manager = Arc::new(Self {
            settings,
            client: RwLock::new(None),
            rebuild: Mutex::new(()),
            databases: DashMap::new(),
            db_init_locks: DashMap::new(),
            endpoint_cursor: AtomicUsize::new(0),
            healthy: AtomicBool::new(false),
            had_failure: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            health_task: parking_lot::Mutex::new(None),
        });
        if manager.settings.enable_health_check {
            manager.spawn_health_check();
        }
        Ok(manager)
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn ensure_not_disposed(&self) -> Result<(), SyncError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SyncError::disposed("cache connection manager"));
        }
        Ok(())
    }

    /// Current shared client, building one if necessary.
    pub async fn connection(&self) -> Result<Client, SyncError> {
        self.ensure_not_disposed()?;

        // Fast path: published and healthy, no lock taken.
        if self.healthy.load(Ordering::Acquire) {
            if let Some(client) = self.client.read().clone() {
                return Ok(client);
            }
        }

        let _guard = self.rebuild.lock().await;
        self.ensure_not_disposed()?;

        // Double-check: a concurrent caller may have rebuilt already.
        if self.healthy.load(Ordering::Acquire) {
            if let Some(client) = self.client.read().clone() {
                return Ok(client);
            }
        }

        // Dispose whatever generation is left before building fresh.
        *self.client.write() = None;
        self.databases.clear();

        let attempt = self.endpoint_cursor.fetch_add(1, Ordering::Relaxed);
        let masked = self.settings.masked_url(attempt);
        info!(endpoint = %masked, "building cache connection");

        let url = self.settings.connection_url(attempt);
        let client = Client::open(url.as_str()).map_err(|err| {
            error!(endpoint = %masked, error = %err, "cache connection string rejected");
            SyncError::from(err)
        })?;

        // Probe the default database eagerly so connect failures surface
        // here rather than on the first command.
        let probe = self
            .build_database_handle(&client, self.settings.default_database)
            .await
            .map_err(|err| {
                error!(endpoint = %masked, error = %err, "cache connection failed");
                err
            })?;

        *self.client.write() = Some(client.clone());
        self.databases
            .insert(self.settings.default_database, probe);
        self.healthy.store(true, Ordering::Release);

        if self.had_failure.swap(false, Ordering::AcqRel) {
            info!(endpoint = %masked, "cache connection restored");
        } else {
            info!(endpoint = %masked, "cache connection established");
        }
        Ok(client)
    }

    /// Handle for a logical database, constructed at most once per live
    /// connection generation.
    pub async fn database(&self, index: i64) -> Result<ConnectionManager, SyncError> {
        self.ensure_not_disposed()?;

        if self.healthy.load(Ordering::Acquire) {
            if let Some(handle) = self.databases.get(&index) {
                return Ok(handle.value().clone());
            }
        }

        let client = self.connection().await?;

        let lock = self
            .db_init_locks
            .entry(index)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(handle) = self.databases.get(&index) {
            return Ok(handle.value().clone());
        }

        let handle = self.build_database_handle(&client, index).await?;
        self.databases.insert(index, handle.clone());
        self.db_init_locks.remove(&index);
        debug!(database = index, "cache database handle created");
        Ok(handle)
    }

    async fn build_database_handle(
        &self,
        client: &Client,
        index: i64,
    ) -> Result<ConnectionManager, SyncError> {
        let info = client.get_connection_info().clone();
        let redis_settings = info.redis_settings().clone().set_db(index);
        let info = info.set_redis_settings(redis_settings);
        let db_client = Client::open(info)?;

        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(Some(self.settings.connect_timeout))
            .set_response_timeout(Some(self.settings.sync_timeout))
            .set_number_of_retries(self.settings.retry_count as usize);
        Ok(ConnectionManager::new_with_config(db_client, config).await?)
    }

    fn spawn_health_check(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let token = self.shutdown.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.settings.health_check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = manager.health_probe().await {
                            warn!(error = %err, "cache health check failed, invalidating connection");
                            manager.invalidate().await;
                        }
                    }
                }
            }
        });
        *self.health_task.lock() = Some(task);
    }

    /// `PING` the default database. A cleared slot is treated as healthy;
    /// there is nothing to invalidate and rebuilds are demand-driven.
    async fn health_probe(&self) -> Result<(), SyncError> {
        let existing = self
            .databases
            .get(&self.settings.default_database)
            .map(|entry| entry.value().clone());
        let Some(mut conn) = existing else {
            return Ok(());
        };

        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<String>(&mut conn);
        match tokio::time::timeout(self.settings.async_timeout, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(SyncError::timeout("health-check PING timed out")),
        }
    }

    /// Drop the published client and every derived handle. The next
    /// `connection()`/`database()` call rebuilds both.
    async fn invalidate(&self) {
        let _guard = self.rebuild.lock().await;
        self.healthy.store(false, Ordering::Release);
        self.had_failure.store(true, Ordering::Release);
        *self.client.write() = None;
        self.databases.clear();
    }

    /// Idempotent teardown: stops the health loop, drops the client and all
    /// database handles. Subsequent calls fail with `Disposed`.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let task = self.health_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.healthy.store(false, Ordering::Release);
        *self.client.write() = None;
        self.databases.clear();
        self.db_init_locks.clear();
        info!("cache connection manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_settings() -> CacheSettings {
        CacheSettings {
            // reserved port; connection attempts fail fast
            endpoints: vec!["127.0.0.1:1".to_string()],
            connect_timeout: std::time::Duration::from_millis(300),
            enable_health_check: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn invalid_settings_rejected_at_construction() {
        let settings = CacheSettings {
            endpoints: vec![],
            ..Default::default()
        };
        assert!(matches!(
            CacheConnectionManager::new(settings),
            Err(SyncError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn disposed_manager_refuses_connections() -> Result<(), SyncError> {
        let manager = CacheConnectionManager::new(offline_settings())?;
        manager.shutdown().await;
        assert!(matches!(
            manager.connection().await,
            Err(SyncError::Disposed { .. })
        ));
        assert!(matches!(
            manager.database(0).await,
            Err(SyncError::Disposed { .. })
        ));
        // Teardown is idempotent.
        manager.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn connect_failure_propagates_and_leaves_slot_clear() -> Result<(), SyncError> {
        let manager = CacheConnectionManager::new(offline_settings())?;
        let first = manager.connection().await;
        assert!(first.is_err());
        // The slot stayed clear, so the next call retries instead of
        // handing out a stale client.
        let second = manager.connection().await;
        assert!(second.is_err());
        manager.shutdown().await;
        Ok(())
    }
}

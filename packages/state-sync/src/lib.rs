#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used, clippy::panic, clippy::todo, clippy::unimplemented))]

pub mod adapters;
pub mod config;
pub mod entities;
pub mod error;
pub mod infra;
pub mod persistence;
pub mod services;
pub mod state;
pub mod telemetry;

// Re-exports for public API
pub use adapters::documents_sea::SeaDocumentStore;
pub use adapters::memory_store::MemoryDocumentStore;
pub use config::{CacheSettings, LockSettings, Settings, SyncSettings};
pub use error::SyncError;
pub use infra::cache::{CacheBackend, CacheConnectionManager, MemoryCache, RedisCache};
pub use persistence::StateStore;
pub use services::lock::{DistributedLockService, LockHandle, LockStatsSnapshot};
pub use services::sync::{DataSyncEngine, DeadLetter, FlushReport, SyncStatsSnapshot};
pub use state::runtime::{build_runtime, RuntimeBuilder, SyncRuntime};

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    sync_test_support::logging::init();
}

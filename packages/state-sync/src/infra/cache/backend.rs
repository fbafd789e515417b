//! The capability surface the rest of the crate requires from a cache.
//!
//! Redis and Garnet both speak RESP2 and differ only in connection tuning,
//! so everything above the connection manager is written against this trait.
//! The conditional primitives (`del_if_match`, `expire_if_match`) are the
//! fenced-lock building blocks; on a RESP backend they are server-side
//! scripts so the compare and the mutation are atomic.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SyncError;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Liveness probe (`PING`).
    async fn ping(&self) -> Result<(), SyncError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError>;

    /// Unconditional write with an optional time-to-live.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), SyncError>;

    /// Set-if-absent with a TTL (`SET key value NX PX ms`). Returns whether
    /// the key was written.
    async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, SyncError>;

    /// Returns whether the key existed.
    async fn del(&self, key: &str) -> Result<bool, SyncError>;

    /// Delete the key only while it still holds `token`. Returns false when
    /// the key is absent or owned by someone else.
    async fn del_if_match(&self, key: &str, token: &str) -> Result<bool, SyncError>;

    /// Reset the key's TTL only while it still holds `token`.
    async fn expire_if_match(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, SyncError>;
}

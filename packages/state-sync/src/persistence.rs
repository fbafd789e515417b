//! The capability the sync engine requires from a durable store.
//!
//! Deliberately narrow: identity plus opaque payload. Richer per-entity
//! queries belong to the application on top, not to the sync layer.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SyncError;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upsert one document; returns its store-side id.
    async fn save(&self, key: &str, payload: &[u8]) -> Result<String, SyncError>;

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError>;

    /// Returns whether a document existed.
    async fn delete(&self, key: &str) -> Result<bool, SyncError>;

    /// Upsert many documents; returns their ids in input order.
    async fn batch_save(&self, items: &[(String, Bytes)]) -> Result<Vec<String>, SyncError>;
}

//! In-process document store for tests and single-node development.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::error::SyncError;
use crate::persistence::StateStore;

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, Bytes>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryDocumentStore {
    async fn save(&self, key: &str, payload: &[u8]) -> Result<String, SyncError> {
        self.documents
            .insert(key.to_string(), Bytes::copy_from_slice(payload));
        Ok(key.to_string())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.documents.get(key).map(|doc| doc.value().to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<bool, SyncError> {
        Ok(self.documents.remove(key).is_some())
    }

    async fn batch_save(&self, items: &[(String, Bytes)]) -> Result<Vec<String>, SyncError> {
        let mut ids = Vec::with_capacity(items.len());
        for (key, payload) in items {
            self.documents.insert(key.clone(), payload.clone());
            ids.push(key.clone());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_delete_round_trip() -> Result<(), SyncError> {
        let store = MemoryDocumentStore::new();
        assert_eq!(store.save("k", b"payload").await?, "k");
        assert_eq!(store.load("k").await?, Some(b"payload".to_vec()));
        assert!(store.delete("k").await?);
        assert!(!store.delete("k").await?);
        assert_eq!(store.load("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn batch_save_returns_ids_in_order() -> Result<(), SyncError> {
        let store = MemoryDocumentStore::new();
        let items = vec![
            ("a".to_string(), Bytes::from_static(b"1")),
            ("b".to_string(), Bytes::from_static(b"2")),
        ];
        assert_eq!(store.batch_save(&items).await?, vec!["a", "b"]);
        assert_eq!(store.len(), 2);
        Ok(())
    }
}

//! In-process cache backend.
//!
//! Implements the full [`CacheBackend`] surface, including TTL expiry and
//! the conditional lock primitives, over a concurrent map. Single-process
//! deployments and the test suites run against this; the lock service and
//! sync engine execute the same code paths as against Redis.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::backend::CacheBackend;
use crate::error::SyncError;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL for a live key, if one is set.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            return None;
        }
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fetch a live entry, reaping it when expired.
    fn live(&self, key: &str) -> Option<MemoryEntry> {
        let expired = {
            let entry = self.entries.get(key)?;
            if entry.is_expired() {
                true
            } else {
                return Some(entry.value().clone());
            }
        };
        if expired {
            self.entries.remove_if(key, |_, v| v.is_expired());
        }
        None
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn ping(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), SyncError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, SyncError> {
        let fresh = MemoryEntry {
            value: value.to_vec(),
            expires_at: Some(Instant::now() + ttl),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired() {
                    slot.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<bool, SyncError> {
        match self.entries.remove(key) {
            Some((_, entry)) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn del_if_match(&self, key: &str, token: &str) -> Result<bool, SyncError> {
        let matched = match self.live(key) {
            Some(entry) => entry.value == token.as_bytes(),
            None => false,
        };
        if matched {
            self.entries
                .remove_if(key, |_, v| v.value == token.as_bytes());
        }
        Ok(matched)
    }

    async fn expire_if_match(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        if self.live(key).is_none() {
            return Ok(false);
        }
        let mut matched = false;
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired() && entry.value == token.as_bytes() {
                entry.expires_at = Some(Instant::now() + ttl);
                matched = true;
            }
        }
        Ok(matched)
    }
}

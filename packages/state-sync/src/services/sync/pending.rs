//! Pending-write queue for the write-behind path.
//!
//! Pure data structure; the engine wraps it in a mutex. One entry per key,
//! last write wins: a re-enqueue replaces the payload and resets the retry
//! count. Every entry carries a sequence number so a flush that raced a
//! newer write can tell that its snapshot went stale.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub payload: Bytes,
    pub ttl: Option<Duration>,
    pub enqueued_at: OffsetDateTime,
    pub seq: u64,
    pub retries: u32,
}

/// What happened to an entry whose flush attempt failed.
pub(crate) enum FailOutcome {
    /// Stays queued for the next flush.
    Retained,
    /// Retry budget exhausted; the entry leaves the queue.
    DeadLettered(PendingWrite),
    /// A newer write replaced the entry while the flush was in flight.
    Superseded,
}

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: BTreeMap<String, PendingWrite>,
    next_seq: u64,
}

impl PendingQueue {
    /// Insert or replace the entry for `key`; returns the queue length
    /// afterwards.
    pub fn upsert(&mut self, key: &str, payload: Bytes, ttl: Option<Duration>) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.to_string(),
            PendingWrite {
                payload,
                ttl,
                enqueued_at: OffsetDateTime::now_utc(),
                seq,
                retries: 0,
            },
        );
        self.entries.len()
    }

    /// Up to `limit` entries in key order. Payloads are cheap clones.
    pub fn snapshot(&self, limit: usize) -> Vec<(String, PendingWrite)> {
        self.entries
            .iter()
            .take(limit)
            .map(|(key, write)| (key.clone(), write.clone()))
            .collect()
    }

    /// Remove `key` after a successful flush, unless a newer write
    /// superseded the flushed snapshot.
    pub fn complete(&mut self, key: &str, seq: u64) -> bool {
        let Entry::Occupied(slot) = self.entries.entry(key.to_string()) else {
            return false;
        };
        if slot.get().seq != seq {
            return false;
        }
        slot.remove();
        true
    }

    /// Record a flush failure for `key`.
    pub fn fail(&mut self, key: &str, seq: u64, max_retries: u32) -> FailOutcome {
        let Entry::Occupied(mut slot) = self.entries.entry(key.to_string()) else {
            return FailOutcome::Superseded;
        };
        if slot.get().seq != seq {
            return FailOutcome::Superseded;
        }
        slot.get_mut().retries += 1;
        if slot.get().retries >= max_retries {
            FailOutcome::DeadLettered(slot.remove())
        } else {
            FailOutcome::Retained
        }
    }

    /// Discard any pending write for `key` (delete path).
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

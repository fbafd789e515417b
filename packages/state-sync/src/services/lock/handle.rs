//! Owner-side handle for an acquired lock.
//!
//! The handle holds a non-owning reference back to its service: the service
//! outlives every handle, and a handle that survives service teardown
//! simply reports itself invalid. Dropping a handle schedules a best-effort
//! release; callers that need to observe the outcome use [`LockHandle::release`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::debug;

use super::LockServiceInner;

pub struct LockHandle {
    resource: String,
    key: String,
    token: String,
    service: Weak<LockServiceInner>,
    released: AtomicBool,
}

impl LockHandle {
    pub(crate) fn new(
        resource: String,
        key: String,
        token: String,
        service: Weak<LockServiceInner>,
    ) -> Self {
        Self {
            resource,
            key,
            token,
            service,
            released: AtomicBool::new(false),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Fencing token stored under the lock key for this acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the cache-side lease currently runs out, if this handle still
    /// owns it.
    pub fn expiry_time(&self) -> Option<OffsetDateTime> {
        let service = self.service.upgrade()?;
        let entry = service.registry.get(&self.key)?;
        if entry.token != self.token {
            return None;
        }
        Some(entry.expiry_time())
    }

    /// True while the handle is unreleased, the service still tracks this
    /// acquisition, and the lease has not expired.
    pub fn is_valid(&self) -> bool {
        if self.released.load(Ordering::Acquire) {
            return false;
        }
        match self.expiry_time() {
            Some(expiry) => expiry > OffsetDateTime::now_utc(),
            None => false,
        }
    }

    /// Extend the lease. False once the handle is released, ownership has
    /// moved, or the cache call failed.
    pub async fn renew(&self, expiry: Option<Duration>) -> bool {
        if self.released.load(Ordering::Acquire) {
            return false;
        }
        let Some(service) = self.service.upgrade() else {
            return false;
        };
        LockServiceInner::renew_key(&service, &self.key, Some(&self.token), expiry).await
    }

    /// Explicit release: only the holder's token clears the key. False when
    /// the lock already expired, was stolen, or the handle was released
    /// before. Idempotent.
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(service) = self.service.upgrade() else {
            return false;
        };
        LockServiceInner::release_key(&service, &self.key, Some(&self.token)).await
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(service) = self.service.upgrade() else {
            return;
        };
        // Fire-and-forget; the TTL covers the case where this never runs.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(resource = %self.resource, "no runtime at handle drop, leaving lock to TTL");
            return;
        };
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        runtime.spawn(async move {
            LockServiceInner::release_key(&service, &key, Some(&token)).await;
        });
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("resource", &self.resource)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

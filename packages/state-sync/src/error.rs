//! Error handling for the state-sync layer.
//!
//! All fallible operations in this crate return [`SyncError`]. Variants map
//! to the failure classes callers can react to: a torn-down component, a
//! deadline, a cache or store transport fault, a payload codec fault, a lock
//! whose ownership moved, or a durable store that refused a write.
//!
//! The lock service deliberately does not surface errors from its acquire
//! path; see `services::lock`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Operation attempted on a component after shutdown.
    #[error("{component} is disposed")]
    Disposed { component: &'static str },

    #[error("Timeout: {detail}")]
    Timeout { detail: String },

    #[error("Transport failure: {detail}")]
    Transport {
        detail: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization failure: {detail}")]
    Serialization {
        detail: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A release or renew found a foreign token under the lock key.
    #[error("Lock ownership lost for resource '{resource}'")]
    OwnershipLost { resource: String },

    /// The durable store refused a write.
    #[error("Persistence rejected: {detail}")]
    PersistenceRejected {
        detail: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {detail}")]
    Config { detail: String },
}

impl SyncError {
    pub fn disposed(component: &'static str) -> Self {
        Self::Disposed { component }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::Timeout {
            detail: detail.into(),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
            source: None,
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    pub fn persistence(detail: impl Into<String>) -> Self {
        Self::PersistenceRejected {
            detail: detail.into(),
            source: None,
        }
    }

    /// True for failures that may clear on retry (network faults, timeouts).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport { .. } | Self::PersistenceRejected { .. }
        )
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                detail: format!("cache command timed out: {err}"),
            };
        }
        Self::Transport {
            detail: format!("cache command failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<sea_orm::DbErr> for SyncError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::PersistenceRejected {
            detail: format!("document store error: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            detail: err.to_string(),
            source: Box::new(err),
        }
    }
}

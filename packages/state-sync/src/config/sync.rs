//! Sync engine settings.
//!
//! Recognized environment variables:
//! - `SYNC_WRITE_BEHIND_BATCH_SIZE` (default 64)
//! - `SYNC_FLUSH_INTERVAL_MS` (default 5000)
//! - `SYNC_BATCH_THRESHOLD` (default 32)
//! - `SYNC_MAX_RETRIES` (default 3)

use std::time::Duration;

use super::{env_millis, env_parse, require_positive};
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Maximum number of pending writes drained per flush.
    pub write_behind_batch_size: usize,
    pub flush_interval: Duration,
    /// Pending-count at which a flush is nudged ahead of the timer.
    pub batch_threshold: usize,
    /// Consecutive per-key flush failures before an entry is dead-lettered.
    pub max_retries: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            write_behind_batch_size: 64,
            flush_interval: Duration::from_millis(5_000),
            batch_threshold: 32,
            max_retries: 3,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, SyncError> {
        let defaults = Self::default();
        let settings = Self {
            write_behind_batch_size: env_parse(
                "SYNC_WRITE_BEHIND_BATCH_SIZE",
                defaults.write_behind_batch_size,
            )?,
            flush_interval: env_millis("SYNC_FLUSH_INTERVAL_MS", defaults.flush_interval)?,
            batch_threshold: env_parse("SYNC_BATCH_THRESHOLD", defaults.batch_threshold)?,
            max_retries: env_parse("SYNC_MAX_RETRIES", defaults.max_retries)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.write_behind_batch_size == 0 {
            return Err(SyncError::config(
                "SYNC_WRITE_BEHIND_BATCH_SIZE must be positive",
            ));
        }
        if self.batch_threshold == 0 {
            return Err(SyncError::config("SYNC_BATCH_THRESHOLD must be positive"));
        }
        require_positive("SYNC_FLUSH_INTERVAL_MS", self.flush_interval)?;
        Ok(())
    }
}

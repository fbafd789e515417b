//! Distributed lock settings.
//!
//! Recognized environment variables:
//! - `LOCK_KEY_PREFIX` (default `lock:`)
//! - `LOCK_DEFAULT_EXPIRY_SECS` (default 30)
//! - `LOCK_DEFAULT_TIMEOUT_SECS` (default 10)
//! - `LOCK_RETRY_INTERVAL_MS` (default 100)
//! - `LOCK_AUTO_RENEWAL`, `LOCK_AUTO_RENEWAL_RATIO` (default true, 0.33)

use std::env;
use std::time::Duration;

use super::{env_bool, env_millis, env_parse, env_secs, require_positive};
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub key_prefix: String,
    pub default_expiry: Duration,
    pub default_timeout: Duration,
    pub retry_interval: Duration,
    pub enable_auto_renewal: bool,
    /// Fraction of a lock's total expiry at which it becomes due for
    /// renewal. Must be strictly between 0 and 1.
    pub auto_renewal_ratio: f64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
            default_expiry: Duration::from_secs(30),
            default_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(100),
            enable_auto_renewal: true,
            auto_renewal_ratio: 0.33,
        }
    }
}

impl LockSettings {
    pub fn from_env() -> Result<Self, SyncError> {
        let defaults = Self::default();
        let settings = Self {
            key_prefix: env::var("LOCK_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            default_expiry: env_secs("LOCK_DEFAULT_EXPIRY_SECS", defaults.default_expiry)?,
            default_timeout: env_secs("LOCK_DEFAULT_TIMEOUT_SECS", defaults.default_timeout)?,
            retry_interval: env_millis("LOCK_RETRY_INTERVAL_MS", defaults.retry_interval)?,
            enable_auto_renewal: env_bool("LOCK_AUTO_RENEWAL", defaults.enable_auto_renewal)?,
            auto_renewal_ratio: env_parse("LOCK_AUTO_RENEWAL_RATIO", defaults.auto_renewal_ratio)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.key_prefix.is_empty() {
            return Err(SyncError::config("LOCK_KEY_PREFIX must not be empty"));
        }
        require_positive("LOCK_DEFAULT_EXPIRY_SECS", self.default_expiry)?;
        require_positive("LOCK_RETRY_INTERVAL_MS", self.retry_interval)?;
        if !(self.auto_renewal_ratio > 0.0 && self.auto_renewal_ratio < 1.0) {
            return Err(SyncError::config(format!(
                "LOCK_AUTO_RENEWAL_RATIO must be in (0, 1), got {}",
                self.auto_renewal_ratio
            )));
        }
        Ok(())
    }

    /// Interval between auto-renewal scans, derived from the expiry in
    /// seconds (the expiry is intentionally held in seconds to avoid the
    /// minute-to-second truncation this formula invites). Clamped to at
    /// least one second.
    pub fn renewal_interval(&self) -> Duration {
        let secs = self.default_expiry.as_secs_f64() * self.auto_renewal_ratio / 2.0;
        Duration::from_secs_f64(secs.max(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        LockSettings::default().validate().unwrap();
    }

    #[test]
    fn ratio_bounds_enforced() {
        for ratio in [0.0, 1.0, -0.2, 1.5] {
            let settings = LockSettings {
                auto_renewal_ratio: ratio,
                ..Default::default()
            };
            assert!(settings.validate().is_err(), "ratio {ratio} should fail");
        }
    }

    #[test]
    fn renewal_interval_derivation() {
        let settings = LockSettings {
            default_expiry: Duration::from_secs(60),
            auto_renewal_ratio: 0.5,
            ..Default::default()
        };
        assert_eq!(settings.renewal_interval(), Duration::from_secs(15));
    }

    #[test]
    fn renewal_interval_clamped_to_one_second() {
        let settings = LockSettings {
            default_expiry: Duration::from_secs(2),
            auto_renewal_ratio: 0.1,
            ..Default::default()
        };
        assert_eq!(settings.renewal_interval(), Duration::from_secs(1));
    }
}

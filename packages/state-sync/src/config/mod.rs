//! Centralized configuration loaded from environment variables.
//!
//! Each subsystem has its own settings struct with a validated `from_env`
//! constructor and a `Default` suitable for tests. `Settings::from_env`
//! loads everything at once for runtime assembly.

pub mod cache;
pub mod lock;
pub mod sync;

use std::env;
use std::str::FromStr;
use std::time::Duration;

pub use cache::CacheSettings;
pub use lock::LockSettings;
pub use sync::SyncSettings;

use crate::error::SyncError;

/// All settings for the state-sync layer.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub lock: LockSettings,
    pub sync: SyncSettings,
}

impl Settings {
    /// Load and validate all configuration from environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        Ok(Self {
            cache: CacheSettings::from_env()?,
            lock: LockSettings::from_env()?,
            sync: SyncSettings::from_env()?,
        })
    }
}

pub(crate) fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, SyncError> {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            SyncError::config(format!(
                "{name} must be a valid {}, got '{raw}'",
                std::any::type_name::<T>()
            ))
        }),
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_bool(name: &str, default: bool) -> Result<bool, SyncError> {
    match env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SyncError::config(format!(
                "{name} must be a boolean (true/false), got '{raw}'"
            ))),
        },
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_millis(name: &str, default: Duration) -> Result<Duration, SyncError> {
    let ms = env_parse::<u64>(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

pub(crate) fn env_secs(name: &str, default: Duration) -> Result<Duration, SyncError> {
    let secs = env_parse::<u64>(name, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}

pub(crate) fn require_positive(name: &str, value: Duration) -> Result<(), SyncError> {
    if value.is_zero() {
        return Err(SyncError::config(format!("{name} must be positive")));
    }
    Ok(())
}

//! Cache connection settings.
//!
//! Recognized environment variables:
//! - `CACHE_ENDPOINTS` — comma-separated `host:port` list (default `127.0.0.1:6379`)
//! - `CACHE_PASSWORD` — optional
//! - `CACHE_DEFAULT_DATABASE` — logical database index (default 0)
//! - `CACHE_CONNECT_TIMEOUT_MS`, `CACHE_SYNC_TIMEOUT_MS`, `CACHE_ASYNC_TIMEOUT_MS`
//! - `CACHE_RETRY_COUNT` — reconnect attempts per command (default 3)
//! - `CACHE_ENABLE_SSL` — `rediss://` scheme when true
//! - `CACHE_HEALTH_CHECK`, `CACHE_HEALTH_CHECK_INTERVAL_SECS`

use std::env;
use std::time::Duration;

use super::{env_bool, env_millis, env_parse, env_secs, require_positive};
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub endpoints: Vec<String>,
    pub password: Option<String>,
    pub default_database: i64,
    pub connect_timeout: Duration,
    pub sync_timeout: Duration,
    pub async_timeout: Duration,
    pub retry_count: u32,
    pub enable_ssl: bool,
    pub enable_health_check: bool,
    pub health_check_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:6379".to_string()],
            password: None,
            default_database: 0,
            connect_timeout: Duration::from_millis(5_000),
            sync_timeout: Duration::from_millis(5_000),
            async_timeout: Duration::from_millis(5_000),
            retry_count: 3,
            enable_ssl: false,
            enable_health_check: true,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl CacheSettings {
    pub fn from_env() -> Result<Self, SyncError> {
        let defaults = Self::default();

        let endpoints = env::var("CACHE_ENDPOINTS")
            .map(|raw| {
                raw.split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or(defaults.endpoints);

        let password = env::var("CACHE_PASSWORD").ok().filter(|p| !p.is_empty());

        let settings = Self {
            endpoints,
            password,
            default_database: env_parse("CACHE_DEFAULT_DATABASE", defaults.default_database)?,
            connect_timeout: env_millis("CACHE_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            sync_timeout: env_millis("CACHE_SYNC_TIMEOUT_MS", defaults.sync_timeout)?,
            async_timeout: env_millis("CACHE_ASYNC_TIMEOUT_MS", defaults.async_timeout)?,
            retry_count: env_parse("CACHE_RETRY_COUNT", defaults.retry_count)?,
            enable_ssl: env_bool("CACHE_ENABLE_SSL", defaults.enable_ssl)?,
            enable_health_check: env_bool("CACHE_HEALTH_CHECK", defaults.enable_health_check)?,
            health_check_interval: env_secs(
                "CACHE_HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval,
            )?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.endpoints.is_empty() {
            return Err(SyncError::config("CACHE_ENDPOINTS must not be empty"));
        }
        if let Some(bad) = self
            .endpoints
            .iter()
            .find(|e| e.trim().is_empty() || !e.contains(':'))
        {
            return Err(SyncError::config(format!(
                "cache endpoint '{bad}' must be host:port"
            )));
        }
        if self.default_database < 0 {
            return Err(SyncError::config(
                "CACHE_DEFAULT_DATABASE must be non-negative",
            ));
        }
        require_positive("CACHE_CONNECT_TIMEOUT_MS", self.connect_timeout)?;
        require_positive("CACHE_SYNC_TIMEOUT_MS", self.sync_timeout)?;
        require_positive("CACHE_ASYNC_TIMEOUT_MS", self.async_timeout)?;
        if self.enable_health_check {
            require_positive("CACHE_HEALTH_CHECK_INTERVAL_SECS", self.health_check_interval)?;
        }
        Ok(())
    }

    fn scheme(&self) -> &'static str {
        if self.enable_ssl {
            "rediss"
        } else {
            "redis"
        }
    }

    /// Connection URL for the endpoint at `index` (modulo the endpoint count).
    pub fn connection_url(&self, index: usize) -> String {
        let endpoint = &self.endpoints[index % self.endpoints.len()];
        match &self.password {
            Some(password) => format!(
                "{}://:{}@{}/{}",
                self.scheme(),
                password,
                endpoint,
                self.default_database
            ),
            None => format!("{}://{}/{}", self.scheme(), endpoint, self.default_database),
        }
    }

    /// Same as [`connection_url`](Self::connection_url) with the password
    /// replaced by a placeholder. This is the only form that may be logged.
    pub fn masked_url(&self, index: usize) -> String {
        let endpoint = &self.endpoints[index % self.endpoints.len()];
        match &self.password {
            Some(_) => format!(
                "{}://:***@{}/{}",
                self.scheme(),
                endpoint,
                self.default_database
            ),
            None => format!("{}://{}/{}", self.scheme(), endpoint, self.default_database),
        }
    }
}

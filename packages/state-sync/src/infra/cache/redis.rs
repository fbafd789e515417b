//! RESP2 cache backend (Redis or Garnet) on top of the connection manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::backend::CacheBackend;
use super::manager::CacheConnectionManager;
use crate::error::SyncError;

/// Delete the key only while it still holds the caller's token. Runs
/// server-side so the compare and the delete are atomic.
static DEL_IF_MATCH: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#,
    )
});

/// Reset the key's TTL only while it still holds the caller's token.
static EXPIRE_IF_MATCH: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#,
    )
});

pub struct RedisCache {
    manager: Arc<CacheConnectionManager>,
    database: i64,
}

impl RedisCache {
    /// Backend over the manager's default database.
    pub fn new(manager: Arc<CacheConnectionManager>) -> Self {
        let database = manager.settings().default_database;
        Self { manager, database }
    }

    pub fn with_database(manager: Arc<CacheConnectionManager>, database: i64) -> Self {
        Self { manager, database }
    }

    async fn conn(&self) -> Result<ConnectionManager, SyncError> {
        self.manager.database(self.database).await
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn ping(&self) -> Result<(), SyncError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let mut conn = self.conn().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), SyncError> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl.as_millis().max(1) as u64)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
            None => {
                conn.set::<_, _, ()>(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, SyncError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<bool, SyncError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn del_if_match(&self, key: &str, token: &str) -> Result<bool, SyncError> {
        let mut conn = self.conn().await?;
        let outcome: i64 = DEL_IF_MATCH
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(outcome == 1)
    }

    async fn expire_if_match(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        let mut conn = self.conn().await?;
        let outcome: i64 = EXPIRE_IF_MATCH
            .key(key)
            .arg(token)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(outcome == 1)
    }
}

//! Remote storage (C3): Redis-backed realization of the storage contract.
//!
//! Grounded on the teacher's `storage::redis_cluster::RedisStorage` for the
//! pool/prefix/config shape, with one correction the teacher's `increment`
//! does not make: spec.md §4.6 requires `incr`/`decr` to be the backend's
//! *native* atomic primitive, not a GET-then-SET round trip (which loses
//! atomicity the instant two processes share a key — exactly the scenario
//! a Redis-backed store exists for). `incr` uses Redis `INCRBY` directly;
//! `decr`'s floor-at-zero semantics have no single Redis command, so it
//! runs as a `redis::Script`, following the atomic-Lua-script pattern for
//! counter backends used elsewhere in the retrieved corpus.

use std::time::Duration;

use deadpool_redis::redis::{AsyncCommands, Script};
use deadpool_redis::{Config, Connection, Pool, Runtime};

use crate::error::{Result, StorageError};
use crate::storage::Storage;
use crate::util::validate_non_blank;

/// Redis storage configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g. `redis://localhost:6379`).
    pub url: String,
    /// Connection pool size.
    pub pool_size: usize,
    /// Prefix applied to every key, for multi-tenant namespacing.
    pub key_prefix: String,
    /// Timeout for acquiring a pooled connection.
    pub connection_timeout: Duration,
    /// TTL applied when `set`/`incr` are called without an explicit TTL.
    pub default_ttl: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "rl:".to_string(),
            connection_timeout: Duration::from_secs(5),
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl RedisConfig {
    /// Configuration pointed at `url`, everything else default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection acquisition timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the store-default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Atomically adds `ARGV[1]` to `KEYS[1]` and, if `ARGV[2]` (seconds) is
/// greater than zero, refreshes its TTL in the same round trip.
const INCR_SCRIPT: &str = r#"
local new = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl and ttl > 0 then
  redis.call('EXPIRE', KEYS[1], ttl)
end
return new
"#;

/// Subtracts `ARGV[1]` from `KEYS[1]`, floored at 0, preserving the key's
/// existing TTL. A no-op (returns 0) if the key does not exist.
const DECR_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local current = tonumber(redis.call('GET', KEYS[1])) or 0
local new = current - tonumber(ARGV[1])
if new < 0 then
  new = 0
end
redis.call('SET', KEYS[1], new, 'KEEPTTL')
return new
"#;

/// Redis-backed storage for sharing rate limit state across processes.
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    default_ttl: Duration,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStorage {
    /// Connect and validate the pool with a PING.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            default_ttl: config.default_ttl,
        })
    }

    /// Connect using only a URL, everything else default.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|_| StorageError::PoolExhausted.into())
    }

    fn ttl_or_default(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.default_ttl)
    }
}

impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_non_blank(key, "key")?;
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);

        conn.get(&full_key)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true).into())
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        validate_non_blank(key, "key")?;
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);
        let ttl_secs = self.ttl_or_default(ttl).as_secs().max(1);

        conn.set_ex::<_, _, ()>(&full_key, value, ttl_secs)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        validate_non_blank(key, "key")?;
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);
        let ttl_secs = ttl.map(|d| d.as_secs()).unwrap_or(0);

        Script::new(INCR_SCRIPT)
            .key(&full_key)
            .arg(delta)
            .arg(ttl_secs)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true).into())
    }

    async fn decr(&self, key: &str, delta: i64) -> Result<i64> {
        validate_non_blank(key, "key")?;
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);

        Script::new(DECR_SCRIPT)
            .key(&full_key)
            .arg(delta)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true).into())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_non_blank(key, "key")?;
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);

        conn.del::<_, ()>(&full_key)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_non_blank(key, "key")?;
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);

        conn.exists(&full_key)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true).into())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        validate_non_blank(key, "key")?;
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);
        let ttl_secs = ttl.as_secs().max(1) as i64;

        conn.expire::<_, ()>(&full_key, ttl_secs)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = RedisConfig::new("redis://localhost:6380")
            .with_prefix("test:")
            .with_pool_size(5)
            .with_default_ttl(Duration::from_secs(30));

        assert_eq!(config.url, "redis://localhost:6380");
        assert_eq!(config.key_prefix, "test:");
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.default_ttl, Duration::from_secs(30));
    }

    // Connection-requiring behavior (get/set/incr/decr atomicity, TTL
    // refresh, floor-at-zero) is exercised in `tests/redis_storage.rs`
    // against a live Redis instance gated by the `THROTTLECORE_REDIS_URL`
    // environment variable, since this module has no fake/in-process Redis
    // double to run against.
}

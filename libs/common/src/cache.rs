//! Redis cache module for the files manager
//!
//! This module provides functionality for connecting to Redis and performing
//! basic cache operations like get and set with TTL support. Expiry of keys
//! is delegated entirely to Redis.

use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::info;

/// Key-value store contract used for session tokens
///
/// Implementations must expire keys on their own once the TTL passed to
/// [`KeyValueStore::set`] elapses.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key, `None` when missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a key-value pair with optional TTL in seconds
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()>;

    /// Delete a key; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        Ok(RedisConfig { url })
    }
}

/// Shared Redis connection
///
/// Wraps one multiplexed connection that reconnects on its own after a
/// failure. Clones share the same connection.
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
}

impl RedisPool {
    /// Connect to Redis
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { manager })
    }

    /// Handle on the shared connection
    pub(crate) fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisPool {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let mut conn = self.connection();

        if let Some(ttl) = ttl_seconds {
            let _: () = conn.set_ex(key, value, ttl).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: u64 = conn.del(key).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_redis_config_defaults() {
        unsafe { std::env::remove_var("REDIS_URL") };

        let config = RedisConfig::from_env().unwrap();
        assert_eq!(config.url, "redis://localhost:6379");
    }

    #[test]
    #[serial]
    fn test_redis_config_from_env() {
        unsafe { std::env::set_var("REDIS_URL", "redis://cache:6380") };

        let config = RedisConfig::from_env().unwrap();
        assert_eq!(config.url, "redis://cache:6380");

        unsafe { std::env::remove_var("REDIS_URL") };
    }

    #[tokio::test]
    async fn test_redis_pool_rejects_malformed_url() {
        let config = RedisConfig {
            url: "not a redis url".to_string(),
        };

        assert!(RedisPool::new(&config).await.is_err());
    }
}

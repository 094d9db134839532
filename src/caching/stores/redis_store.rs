//! # Redis Cache Store
//!
//! Redis-backed [`CacheStore`] with a shared connection manager, key prefixing
//! and bounded retry with reconnect.

use super::CacheStore;
use crate::caching::{CacheError, CacheResult};
use crate::core::config::CacheConfig;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Redis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Key prefix for all cache entries
    pub key_prefix: String,

    /// Maximum number of retries after the first failed attempt
    pub max_retries: u32,

    /// Base retry delay, multiplied by the attempt number
    pub retry_delay: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            connection_timeout: Duration::from_secs(5),
            key_prefix: "newsroom:".to_string(),
            max_retries: 2,
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl From<&CacheConfig> for RedisCacheConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            url: config.url(),
            connection_timeout: config.connection_timeout,
            key_prefix: config.key_prefix.clone(),
            max_retries: config.max_retries,
            ..Default::default()
        }
    }
}

type RedisFuture<'a, T> = Pin<Box<dyn Future<Output = RedisResult<T>> + Send + 'a>>;

/// Redis cache implementation
pub struct RedisCache {
    config: RedisCacheConfig,

    /// Swapped out wholesale on reconnect
    connection_manager: RwLock<ConnectionManager>,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn new(config: RedisCacheConfig) -> CacheResult<Self> {
        let connection_manager = Self::connect(&config).await?;

        info!(
            url = %crate::observability::mask_password(&config.url),
            "Redis cache connected"
        );

        Ok(Self {
            config,
            connection_manager: RwLock::new(connection_manager),
        })
    }

    async fn connect(config: &RedisCacheConfig) -> CacheResult<ConnectionManager> {
        let client = Client::open(config.url.as_str())?;

        match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client)).await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Unavailable),
        }
    }

    /// Get the full cache key with prefix
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Execute a Redis operation with retry logic
    async fn execute_with_retry<F, T>(&self, operation: F) -> CacheResult<T>
    where
        F: for<'c> Fn(&'c mut ConnectionManager) -> RedisFuture<'c, T> + Send + Sync,
        T: Send,
    {
        let mut retries = 0;

        loop {
            // ConnectionManager is a cheap handle onto a multiplexed connection
            let mut conn = self.connection_manager.read().await.clone();

            match operation(&mut conn).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if retries >= self.config.max_retries {
                        return Err(CacheError::Redis(e));
                    }

                    retries += 1;
                    debug!(attempt = retries, error = %e, "Redis operation failed, retrying");
                    tokio::time::sleep(self.config.retry_delay * retries).await;

                    if e.is_connection_dropped() || e.is_io_error() {
                        if let Err(reconnect_err) = self.reconnect().await {
                            warn!("Failed to reconnect to Redis: {}", reconnect_err);
                        }
                    }
                }
            }
        }
    }

    /// Reconnect to Redis
    async fn reconnect(&self) -> CacheResult<()> {
        let new_connection_manager = Self::connect(&self.config).await?;

        let mut conn = self.connection_manager.write().await;
        *conn = new_connection_manager;

        info!("Reconnected to Redis");
        Ok(())
    }
}

/// Redis rejects a zero expiry
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.full_key(key);

        self.execute_with_retry(|conn| {
            let full_key = full_key.clone();
            Box::pin(async move { conn.get::<_, Option<Vec<u8>>>(&full_key).await })
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let full_key = self.full_key(key);
        let ttl_seconds = ttl_seconds(ttl);

        self.execute_with_retry(|conn| {
            let full_key = full_key.clone();
            let value = value.to_vec();
            Box::pin(async move { conn.set_ex::<_, _, ()>(&full_key, value, ttl_seconds).await })
        })
        .await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);

        let deleted_count: i64 = self
            .execute_with_retry(|conn| {
                let full_key = full_key.clone();
                Box::pin(async move { conn.del(&full_key).await })
            })
            .await?;

        Ok(deleted_count > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);

        self.execute_with_retry(|conn| {
            let full_key = full_key.clone();
            Box::pin(async move { conn.exists(&full_key).await })
        })
        .await
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        let full_key = self.full_key(key);

        // A single INCR; never read-then-write
        self.execute_with_retry(|conn| {
            let full_key = full_key.clone();
            Box::pin(async move { conn.incr(&full_key, 1i64).await })
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        let ttl_seconds = ttl_seconds(ttl) as i64;

        self.execute_with_retry(|conn| {
            let full_key = full_key.clone();
            Box::pin(async move { conn.expire(&full_key, ttl_seconds).await })
        })
        .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let full_key = self.full_key(key);

        let millis: i64 = self
            .execute_with_retry(|conn| {
                let full_key = full_key.clone();
                Box::pin(async move { conn.pttl(&full_key).await })
            })
            .await?;

        // -2: missing key, -1: no expiry
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let result = self
            .execute_with_retry(|conn| {
                Box::pin(async move { redis::cmd("PING").query_async::<_, String>(conn).await })
            })
            .await;

        match result {
            Ok(response) => Ok(response == "PONG"),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_redis_cache() -> RedisCache {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
        let config = RedisCacheConfig {
            url,
            key_prefix: format!("newsroom-test:{}:", uuid::Uuid::new_v4()),
            ..Default::default()
        };

        RedisCache::new(config).await.unwrap()
    }

    #[test]
    fn test_config_from_cache_config() {
        let cache = CacheConfig {
            password: Some("pw".to_string()),
            key_prefix: "np:".to_string(),
            ..Default::default()
        };
        let redis = RedisCacheConfig::from(&cache);
        assert_eq!(redis.url, "redis://:pw@localhost:6379/0");
        assert_eq!(redis.key_prefix, "np:");
    }

    #[test]
    fn test_ttl_seconds_never_zero() {
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(60)), 60);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (REDIS_URL)
    async fn test_basic_operations() {
        let cache = setup_redis_cache().await;

        let key = "test_key";
        let value = b"test_value";
        let ttl = Duration::from_secs(60);

        cache.set(key, value, ttl).await.unwrap();
        let result = cache.get(key).await.unwrap();
        assert_eq!(result, Some(value.to_vec()));

        assert!(cache.exists(key).await.unwrap());

        assert!(cache.delete(key).await.unwrap());
        assert!(!cache.exists(key).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (REDIS_URL)
    async fn test_increment_and_expire() {
        let cache = setup_redis_cache().await;

        assert_eq!(cache.increment("counter").await.unwrap(), 1);
        assert_eq!(cache.increment("counter").await.unwrap(), 2);
        assert_eq!(cache.ttl("counter").await.unwrap(), None);

        assert!(cache.expire("counter", Duration::from_secs(30)).await.unwrap());
        let ttl = cache.ttl("counter").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(30));

        assert!(!cache.expire("missing", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (REDIS_URL)
    async fn test_health_check() {
        let cache = setup_redis_cache().await;
        assert!(cache.health_check().await.unwrap());
    }
}

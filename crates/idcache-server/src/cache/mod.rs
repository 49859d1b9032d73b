//! Redis cache tier.
//!
//! Optional: without Redis each instance caches locally and change events
//! stay inside the process.

pub mod redis;

use std::time::Duration;

use deadpool_redis::{CreatePoolError, Pool, Runtime};

use crate::config::RedisConfig;

pub use self::redis::RedisCacheStore;

/// Build a connection pool without connecting.
pub fn build_pool(config: &RedisConfig) -> Result<Pool, CreatePoolError> {
    let timeout = Duration::from_millis(config.timeout_ms);

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = redis_config.get_pool_config();
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    redis_config.create_pool(Some(Runtime::Tokio1))
}

/// Connect to Redis if enabled.
///
/// Returns `None` when Redis is disabled or unreachable; the caller falls
/// back to local-only caching.
pub async fn connect(config: &RedisConfig) -> Option<Pool> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return None;
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let pool = match build_pool(config) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return None;
        }
    };

    // Test connection
    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            Some(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_skips_disabled_redis() {
        assert!(connect(&RedisConfig::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_connect_falls_back_when_unreachable() {
        let config = RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".to_string(),
            timeout_ms: 200,
            ..Default::default()
        };
        assert!(connect(&config).await.is_none());
    }

    #[test]
    fn test_build_pool_applies_size() {
        let config = RedisConfig {
            pool_size: 3,
            ..Default::default()
        };
        let pool = build_pool(&config).unwrap();
        assert_eq!(pool.status().max_size, 3);
    }
}

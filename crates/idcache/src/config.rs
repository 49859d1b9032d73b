//! Cache and cleanup configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [idcache.cache]
//! enabled = true
//! key_prefix = "tenant-a:"
//! default_ttl = "5m"
//! negative_ttl = "30s"
//!
//! [idcache.cleanup]
//! enabled = true
//! interval = "30m"
//! batch_size = 100
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::EntryOptions;

/// Root configuration for the caching and cleanup core.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IdCacheConfig {
    /// Read-through cache configuration.
    pub cache: CacheConfig,

    /// Expired grant and device code cleanup configuration.
    pub cleanup: CleanupConfig,
}

/// Read-through cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching of clients, resources, and CORS decisions.
    /// When disabled, every read goes straight to the backing store.
    pub enabled: bool,

    /// Prefix prepended to every cache key.
    /// Use it to isolate tenants or deployments sharing one cache tier.
    pub key_prefix: String,

    /// TTL applied when no entity-specific TTL is set.
    /// Bounds staleness even if invalidation events are lost.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// TTL for client lookups.
    #[serde(default, with = "humantime_serde::option")]
    pub client_ttl: Option<Duration>,

    /// TTL for resource and scope lookups.
    #[serde(default, with = "humantime_serde::option")]
    pub resource_ttl: Option<Duration>,

    /// TTL for CORS origin decisions.
    #[serde(default, with = "humantime_serde::option")]
    pub cors_ttl: Option<Duration>,

    /// Use sliding expiration. Each hit extends an entry by half its TTL,
    /// and the TTL stays the hard limit on its total lifetime.
    pub sliding: bool,

    /// Cache "not found" and empty results.
    pub negative_caching: bool,

    /// TTL for "not found" and empty results.
    #[serde(with = "humantime_serde")]
    pub negative_ttl: Duration,

    /// How often expired entries are swept from the local cache.
    /// Zero disables the sweep; expired entries are still never served.
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: String::new(),
            default_ttl: Duration::from_secs(300), // 5 minutes
            client_ttl: None,
            resource_ttl: None,
            cors_ttl: None,
            sliding: false,
            negative_caching: true,
            negative_ttl: Duration::from_secs(60),
            purge_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Effective TTL for client lookups.
    pub fn client_ttl(&self) -> Duration {
        self.client_ttl.unwrap_or(self.default_ttl)
    }

    /// Effective TTL for resource lookups.
    pub fn resource_ttl(&self) -> Duration {
        self.resource_ttl.unwrap_or(self.default_ttl)
    }

    /// Effective TTL for CORS decisions.
    pub fn cors_ttl(&self) -> Duration {
        self.cors_ttl.unwrap_or(self.default_ttl)
    }

    /// Entry options for a positive result cached for `ttl`.
    pub fn entry_options(&self, ttl: Duration) -> EntryOptions {
        if self.sliding {
            EntryOptions::sliding_with_limit(ttl / 2, ttl)
        } else {
            EntryOptions::absolute(ttl)
        }
    }

    /// Entry options for a negative result, or `None` if those are not cached.
    pub fn negative_entry_options(&self) -> Option<EntryOptions> {
        self.negative_caching
            .then(|| EntryOptions::absolute(self.negative_ttl))
    }
}

/// Expired grant and device code cleanup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Run the cleanup worker. When disabled it never touches storage.
    pub enabled: bool,

    /// Time between cleanup runs.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Maximum rows deleted per storage call.
    pub batch_size: usize,

    /// Maximum batches per target in one run.
    /// Remaining rows are picked up by the next run.
    pub max_batches_per_run: usize,

    /// Run once immediately at startup instead of waiting one interval.
    pub run_on_start: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30 * 60),
            batch_size: 100,
            max_batches_per_run: 100,
            run_on_start: false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl IdCacheConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - A cache TTL is zero while caching is enabled
    /// - The negative TTL exceeds the default TTL
    /// - The cleanup interval, batch size, or batch limit is zero while cleanup is enabled
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled {
            let ttls = [
                ("cache.default_ttl", self.cache.default_ttl),
                ("cache.client_ttl", self.cache.client_ttl()),
                ("cache.resource_ttl", self.cache.resource_ttl()),
                ("cache.cors_ttl", self.cache.cors_ttl()),
            ];
            for (name, ttl) in ttls {
                if ttl.is_zero() {
                    return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
                }
            }

            if self.cache.negative_caching {
                if self.cache.negative_ttl.is_zero() {
                    return Err(ConfigError::InvalidValue(
                        "cache.negative_ttl must be > 0 when negative_caching is enabled"
                            .to_string(),
                    ));
                }
                if self.cache.negative_ttl > self.cache.default_ttl {
                    return Err(ConfigError::InvalidValue(
                        "cache.negative_ttl must be <= cache.default_ttl".to_string(),
                    ));
                }
            }
        }

        if self.cleanup.enabled {
            if self.cleanup.interval.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "cleanup.interval must be > 0".to_string(),
                ));
            }
            if self.cleanup.batch_size == 0 {
                return Err(ConfigError::InvalidValue(
                    "cleanup.batch_size must be > 0".to_string(),
                ));
            }
            if self.cleanup.max_batches_per_run == 0 {
                return Err(ConfigError::InvalidValue(
                    "cleanup.max_batches_per_run must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

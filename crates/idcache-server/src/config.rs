use std::time::Duration;

use idcache::IdCacheConfig;
use idcache_core::{ApiResource, ApiScope, Client, GrantType, IdentityResource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub idcache: IdCacheConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Redis validation
        if self.redis.enabled {
            if self.redis.url.is_empty() {
                return Err("redis.enabled=true requires redis.url".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
            if self.redis.channel.is_empty() {
                return Err("redis.channel must not be empty".into());
            }
        }
        // Seed validation
        let mut client_ids: Vec<&str> = self
            .seed
            .clients
            .iter()
            .map(|c| c.client_id.as_str())
            .collect();
        if client_ids.iter().any(|id| id.is_empty()) {
            return Err("seed.clients[].client_id must not be empty".into());
        }
        client_ids.sort_unstable();
        if let Some(pair) = client_ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(format!("seed.clients has duplicate client_id '{}'", pair[0]));
        }

        self.idcache.validate().map_err(|e| e.to_string())
    }
}

// =============================================================================
// Instance
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Name shown in logs.
    #[serde(default = "default_instance_name")]
    pub name: String,

    /// Fixed instance id. A random one is generated at startup when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

fn default_instance_name() -> String {
    "idcache".into()
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: default_instance_name(),
            id: None,
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// =============================================================================
// Redis
// =============================================================================

/// Redis cache tier and event channel.
///
/// When disabled, each instance caches locally and change events only reach
/// caches in the same process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Pub/sub channel carrying change events.
    #[serde(default = "default_redis_channel")]
    pub channel: String,

    /// Prefix for every key written to Redis.
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,

    /// Upper bound on how long an entry read from Redis stays in the local tier.
    #[serde(default = "default_redis_local_ttl", with = "humantime_serde")]
    pub local_ttl: Duration,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_channel() -> String {
    "idcache:events".to_string()
}

fn default_redis_key_prefix() -> String {
    "idcache:".to_string()
}

fn default_redis_local_ttl() -> Duration {
    Duration::from_secs(60)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            channel: default_redis_channel(),
            key_prefix: default_redis_key_prefix(),
            local_ttl: default_redis_local_ttl(),
        }
    }
}

// =============================================================================
// Seed data
// =============================================================================

/// Clients and resources loaded into the in-memory store at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub clients: Vec<SeedClient>,
    #[serde(default)]
    pub identity_resources: Vec<SeedIdentityResource>,
    #[serde(default)]
    pub api_resources: Vec<SeedApiResource>,
    #[serde(default)]
    pub api_scopes: Vec<SeedApiScope>,
}

impl SeedConfig {
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
            && self.identity_resources.is_empty()
            && self.api_resources.is_empty()
            && self.api_scopes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedClient {
    pub client_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    #[serde(default)]
    pub allowed_cors_origins: Vec<String>,
    #[serde(default)]
    pub allowed_scopes: Vec<String>,
    #[serde(default)]
    pub allowed_grant_types: Vec<GrantType>,
}

impl From<SeedClient> for Client {
    fn from(seed: SeedClient) -> Self {
        let name = seed.name.unwrap_or_else(|| seed.client_id.clone());
        let mut client = Client::new(seed.client_id, name);
        client.enabled = seed.enabled;
        client.redirect_uris = seed.redirect_uris;
        client.post_logout_redirect_uris = seed.post_logout_redirect_uris;
        client.allowed_cors_origins = seed.allowed_cors_origins;
        client.allowed_scopes = seed.allowed_scopes;
        client.allowed_grant_types = seed.allowed_grant_types;
        client
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedIdentityResource {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub user_claims: Vec<String>,
}

impl From<SeedIdentityResource> for IdentityResource {
    fn from(seed: SeedIdentityResource) -> Self {
        let mut resource = IdentityResource::new(seed.name);
        resource.display_name = seed.display_name;
        resource.user_claims = seed.user_claims;
        resource
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedApiResource {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub user_claims: Vec<String>,
}

impl From<SeedApiResource> for ApiResource {
    fn from(seed: SeedApiResource) -> Self {
        let mut resource = ApiResource::new(seed.name);
        resource.display_name = seed.display_name;
        resource.scopes = seed.scopes;
        resource.user_claims = seed.user_claims;
        resource
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedApiScope {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub user_claims: Vec<String>,
}

impl From<SeedApiScope> for ApiScope {
    fn from(seed: SeedApiScope) -> Self {
        let mut scope = ApiScope::new(seed.name);
        scope.display_name = seed.display_name;
        scope.required = seed.required;
        scope.user_claims = seed.user_claims;
        scope
    }
}

fn default_true() -> bool {
    true
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, read when no path is given.
    pub const DEFAULT_CONFIG_PATH: &str = "idcache.toml";

    /// Load configuration from a TOML file plus `IDCACHE__*` overrides.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., IDCACHE__REDIS__ENABLED=true
        builder = builder.add_source(
            Environment::with_prefix("IDCACHE")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

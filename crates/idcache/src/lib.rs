//! # idcache
//!
//! Configuration cache and token cleanup core for an OAuth/OIDC server.
//!
//! ## Overview
//!
//! - [`cache`] - distributed read-through cache with single-flight population
//! - [`keys`] - deterministic cache keys
//! - [`invalidation`] - entity-to-key registry and the event-driven invalidator
//! - [`stores`] - pass-through and caching client, resource, and CORS stores
//! - [`cleanup`] - batched deletion of expired grants and device-flow codes
//! - [`storage`] - backing storage contracts
//! - [`channel`] - change event transport contract
//! - [`module`] - startup wiring ([`IdentityCache`])
//!
//! ## Example
//!
//! ```ignore
//! use idcache::{IdCacheConfig, IdentityCache};
//!
//! let cache = IdentityCache::builder(IdCacheConfig::default())
//!     .client_storage(storage.clone())
//!     .resource_storage(storage.clone())
//!     .cleanup_target(grants)
//!     .event_channel(bus)
//!     .build()?;
//!
//! let tasks = cache.start(shutdown_rx);
//! let client = cache.clients().find_client_by_id("app1").await?;
//! ```

pub mod cache;
pub mod channel;
pub mod cleanup;
pub mod config;
pub mod invalidation;
pub mod keys;
pub mod metrics;
pub mod module;
pub mod once;
pub mod storage;
pub mod stores;

pub use cache::{CacheStats, CacheStore, DistributedCache, EntryOptions, LocalCacheStore};
pub use channel::{ChannelMessage, EventChannel, EventSubscription, Received};
pub use cleanup::{CleanupReport, CleanupState, TokenCleanupService, TokenCleanupWorker};
pub use config::{CacheConfig, CleanupConfig, ConfigError, IdCacheConfig};
pub use idcache_core::{Error, Result};
pub use invalidation::{CacheInvalidator, KeyRegistry};
pub use keys::{CacheKey, KeyBuilder};
pub use module::{BackgroundTasks, IdentityCache, IdentityCacheBuilder};
pub use once::OneTimeRunner;
pub use storage::{ClientStorage, ExpiredRecordStorage, ResourceStorage};
pub use stores::{ClientStore, CorsPolicyService, ResourceStore};

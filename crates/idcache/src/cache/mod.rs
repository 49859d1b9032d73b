//! Distributed read-through cache.
//!
//! - [`entry`] - cached entries and expiration policies
//! - [`store`] - the byte-level [`CacheStore`] seam and the local store
//! - [`distributed`] - the typed [`DistributedCache`] with single-flight population

pub mod distributed;
pub mod entry;
pub mod store;

pub use distributed::DistributedCache;
pub use entry::{CachedEntry, DEFAULT_TTL, EntryOptions};
pub use store::{CacheStats, CacheStore, LocalCacheStore};

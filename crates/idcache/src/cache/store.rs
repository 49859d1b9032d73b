//! Byte-level cache stores.
//!
//! [`CacheStore`] is the seam between the typed [`DistributedCache`] and
//! the storage tier. [`LocalCacheStore`] keeps entries in a per-instance
//! `DashMap`; tiered stores (e.g. a shared Redis L2) live in the server crate.
//!
//! [`DistributedCache`]: super::DistributedCache

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::entry::{CachedEntry, EntryOptions};
use crate::metrics;

/// Storage tier for serialized cache entries.
///
/// All operations are safe for unrestricted concurrent use. Removal is
/// idempotent: removing an absent key is a no-op.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the bytes stored under `key`.
    ///
    /// Returns `None` if the entry doesn't exist or has expired. Sliding
    /// entries are extended by a hit.
    async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, value: Vec<u8>, options: &EntryOptions);

    /// Remove the entry under `key`.
    async fn remove(&self, key: &str);

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Returns the number of local entries removed.
    async fn remove_prefix(&self, prefix: &str) -> usize;

    /// Remove every entry.
    async fn clear(&self);

    /// Drop expired entries to free memory. Returns the number removed.
    ///
    /// Default implementation is a no-op (for tiers with native TTL).
    fn purge_expired(&self) -> usize {
        0
    }

    /// Get statistics for monitoring.
    fn stats(&self) -> CacheStats;
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of entries currently held locally.
    pub entries: usize,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
    /// Storage mode ("local", "redis").
    pub mode: &'static str,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// In-process cache store backed by `DashMap`.
///
/// Each server instance has its own; cross-instance consistency comes from
/// the invalidator, not from this store.
#[derive(Default)]
pub struct LocalCacheStore {
    entries: DashMap<String, CachedEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared store.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if a live entry exists under `key`. Does not count as a hit.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Get an entry and record the hit or miss in `tier`.
    pub fn lookup(&self, key: &str, tier: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired() {
                entry.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit(tier);
                return Some(Arc::clone(&entry.data));
            }
        }

        // Only drop the entry if it is still the expired one; a concurrent
        // writer may have replaced it already.
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired())
            .is_some()
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();
        None
    }

    /// Insert an entry built elsewhere (used by tiered stores to promote L2 hits).
    pub fn insert_entry(&self, key: &str, entry: CachedEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// Synchronous removal.
    pub fn remove_local(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Synchronous prefix removal.
    pub fn remove_prefix_local(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    fn purge(&self) -> usize {
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        metrics::set_cache_entries("local", self.entries.len());

        removed
    }

    pub fn local_stats(&self, mode: &'static str) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            mode,
        }
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.lookup(key, "local")
    }

    async fn set(&self, key: &str, value: Vec<u8>, options: &EntryOptions) {
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, options));
    }

    async fn remove(&self, key: &str) {
        if self.remove_local(key) {
            tracing::debug!(key = %key, "cache entry removed");
        }
    }

    async fn remove_prefix(&self, prefix: &str) -> usize {
        let removed = self.remove_prefix_local(prefix);
        if removed > 0 {
            tracing::debug!(prefix = %prefix, removed, "cache entries removed by prefix");
        }
        removed
    }

    async fn clear(&self) {
        self.entries.clear();
    }

    fn purge_expired(&self) -> usize {
        self.purge()
    }

    fn stats(&self) -> CacheStats {
        self.local_stats("local")
    }
}

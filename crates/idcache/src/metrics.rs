//! Cache, invalidation, and cleanup metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host installs a recorder.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "idcache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "idcache_misses_total";
    pub const CACHE_POPULATIONS_TOTAL: &str = "idcache_populations_total";
    pub const CACHE_ENTRIES: &str = "idcache_entries";
    pub const INVALIDATIONS_TOTAL: &str = "idcache_invalidations_total";
    pub const CLEANUP_DELETED_TOTAL: &str = "idcache_cleanup_deleted_total";
    pub const CLEANUP_FAILURES_TOTAL: &str = "idcache_cleanup_failures_total";
}

/// Record a cache hit in the given tier ("local", "L1", "L2").
pub fn record_cache_hit(tier: &str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a population of a missing key from the backing store.
pub fn record_population() {
    counter!(names::CACHE_POPULATIONS_TOTAL).increment(1);
}

/// Set the number of cache entries.
pub fn set_cache_entries(tier: &str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier.to_string()).set(count as f64);
}

/// Record a processed invalidation for an entity type.
pub fn record_invalidation(entity: &str) {
    counter!(names::INVALIDATIONS_TOTAL, "entity" => entity.to_string()).increment(1);
}

/// Record rows deleted by the cleanup worker.
pub fn record_cleanup_deleted(target: &str, count: u64) {
    counter!(names::CLEANUP_DELETED_TOTAL, "target" => target.to_string()).increment(count);
}

/// Record a failed cleanup batch.
pub fn record_cleanup_failure(target: &str) {
    counter!(names::CLEANUP_FAILURES_TOTAL, "target" => target.to_string()).increment(1);
}

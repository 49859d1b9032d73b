//! Two-tier cache store: per-instance DashMap (L1) in front of Redis (L2).
//!
//! L1 is checked first, then L2. L2 hits are promoted to L1 for at most
//! the remaining Redis TTL. Redis failures degrade to L1-only operation
//! and are never surfaced to readers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, redis::AsyncCommands};
use idcache::cache::{CacheStats, CacheStore, CachedEntry, EntryOptions, LocalCacheStore};
use idcache::metrics;

/// Keys deleted per DEL command when removing by prefix.
const DEL_BATCH: usize = 500;

/// Cache store backed by a local L1 and a shared Redis L2.
pub struct RedisCacheStore {
    pool: Pool,
    local: LocalCacheStore,
    key_prefix: String,
    local_ttl: Duration,
    l2_hits: AtomicU64,
}

impl RedisCacheStore {
    /// Create a store writing Redis keys under `key_prefix`.
    ///
    /// Entries promoted from Redis stay in L1 for at most `local_ttl`.
    pub fn new(pool: Pool, key_prefix: impl Into<String>, local_ttl: Duration) -> Self {
        Self {
            pool,
            local: LocalCacheStore::new(),
            key_prefix: key_prefix.into(),
            local_ttl,
            l2_hits: AtomicU64::new(0),
        }
    }

    /// The local tier.
    pub fn local(&self) -> &LocalCacheStore {
        &self.local
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Option<Connection> {
        match self.pool.get().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, using local cache only");
                None
            }
        }
    }

    async fn get_remote(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let redis_key = self.redis_key(key);

        let result: ::redis::RedisResult<(Option<Vec<u8>>, i64)> = ::redis::pipe()
            .get(&redis_key)
            .pttl(&redis_key)
            .query_async(&mut conn)
            .await;

        match result {
            // PTTL is -2 when the key expired between the two commands.
            Ok((Some(data), remaining_ms)) if remaining_ms != -2 => {
                let ttl = promotion_ttl(remaining_ms, self.local_ttl);
                let data = Arc::new(data);
                self.local.insert_entry(
                    key,
                    CachedEntry::with_shared(Arc::clone(&data), &EntryOptions::absolute(ttl)),
                );
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit("L2");
                Some(data)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(key = %redis_key, error = %e, "Redis get failed");
                None
            }
        }
    }

    /// Delete every Redis key matching `pattern`. Returns the number deleted.
    async fn delete_matching(conn: &mut Connection, pattern: &str) -> ::redis::RedisResult<usize> {
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        for chunk in keys.chunks(DEL_BATCH) {
            let _: () = conn.del(chunk).await?;
        }
        Ok(keys.len())
    }

    async fn remove_remote_prefix(&self, prefix: &str) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let pattern = format!("{}*", escape_glob(&self.redis_key(prefix)));
        match Self::delete_matching(&mut conn, &pattern).await {
            Ok(removed) => tracing::debug!(pattern = %pattern, removed, "Redis keys removed"),
            Err(e) => tracing::warn!(pattern = %pattern, error = %e, "Redis prefix removal failed"),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(data) = self.local.lookup(key, "L1") {
            return Some(data);
        }
        self.get_remote(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, options: &EntryOptions) {
        let data = Arc::new(value);
        self.local
            .insert_entry(key, CachedEntry::with_shared(Arc::clone(&data), options));

        let Some(mut conn) = self.connection().await else {
            return;
        };
        let redis_key = self.redis_key(key);
        let ttl_ms = remote_ttl(options).as_millis().clamp(1, u64::MAX as u128) as u64;
        let result: ::redis::RedisResult<()> = conn.pset_ex(&redis_key, data.as_slice(), ttl_ms).await;
        if let Err(e) = result {
            tracing::warn!(key = %redis_key, error = %e, "Redis set failed");
        }
    }

    async fn remove(&self, key: &str) {
        self.local.remove_local(key);

        let Some(mut conn) = self.connection().await else {
            return;
        };
        let redis_key = self.redis_key(key);
        let result: ::redis::RedisResult<()> = conn.del(&redis_key).await;
        if let Err(e) = result {
            tracing::warn!(key = %redis_key, error = %e, "Redis delete failed");
        }
    }

    async fn remove_prefix(&self, prefix: &str) -> usize {
        let removed = self.local.remove_prefix_local(prefix);
        self.remove_remote_prefix(prefix).await;
        removed
    }

    async fn clear(&self) {
        self.local.clear().await;

        // An empty prefix would match every key in the database.
        if self.key_prefix.is_empty() {
            tracing::warn!("Redis key prefix is empty, leaving Redis untouched on clear");
            return;
        }
        self.remove_remote_prefix("").await;
    }

    fn purge_expired(&self) -> usize {
        self.local.purge_expired()
    }

    fn stats(&self) -> CacheStats {
        let mut stats = self.local.local_stats("redis");
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        stats.hits += l2_hits;
        stats.misses = stats.misses.saturating_sub(l2_hits);
        stats
    }
}

/// L1 lifetime for an entry promoted from Redis.
///
/// `remaining_ms` is the PTTL reply; -1 means the key has no expiry.
fn promotion_ttl(remaining_ms: i64, local_ttl: Duration) -> Duration {
    u64::try_from(remaining_ms)
        .map(Duration::from_millis)
        .map_or(local_ttl, |remaining| remaining.min(local_ttl))
}

/// Redis TTL for an entry. Redis does not slide, so the longest lifetime
/// the policy allows is used.
fn remote_ttl(options: &EntryOptions) -> Duration {
    match *options {
        EntryOptions::Absolute(ttl) | EntryOptions::Sliding(ttl) => ttl,
        EntryOptions::SlidingWithLimit { absolute, .. } => absolute,
    }
}

/// Escape glob metacharacters for SCAN MATCH.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::unreachable_pool;

    fn store() -> RedisCacheStore {
        RedisCacheStore::new(unreachable_pool(), "test:", Duration::from_secs(60))
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("client:id:"), "client:id:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn test_promotion_ttl_is_bounded() {
        let local = Duration::from_secs(60);
        assert_eq!(promotion_ttl(5_000, local), Duration::from_secs(5));
        assert_eq!(promotion_ttl(120_000, local), local);
        assert_eq!(promotion_ttl(-1, local), local);
    }

    #[test]
    fn test_remote_ttl_uses_longest_lifetime() {
        let ttl = Duration::from_secs(30);
        assert_eq!(remote_ttl(&EntryOptions::absolute(ttl)), ttl);
        assert_eq!(
            remote_ttl(&EntryOptions::sliding_with_limit(ttl, ttl * 4)),
            ttl * 4
        );
    }

    #[tokio::test]
    async fn test_local_tier_serves_while_redis_is_down() {
        let store = store();
        store
            .set("client:id:app1", b"app1".to_vec(), &EntryOptions::default())
            .await;

        assert_eq!(
            store.get("client:id:app1").await.as_deref(),
            Some(&b"app1".to_vec())
        );
        assert!(store.get("client:id:other").await.is_none());

        let stats = store.stats();
        assert_eq!(stats.mode, "redis");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_removal_applies_locally_while_redis_is_down() {
        let store = store();
        for key in ["cors:origin:a", "cors:origin:b", "client:id:app1"] {
            store.set(key, b"1".to_vec(), &EntryOptions::default()).await;
        }

        assert_eq!(store.remove_prefix("cors:").await, 2);
        store.remove("client:id:app1").await;
        assert!(store.local().is_empty());
    }
}

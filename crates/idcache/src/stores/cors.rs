//! CORS origin policy.
//!
//! An origin is allowed if any client lists it in its allowed CORS origins.
//! Origins are compared case-insensitively, ignoring a trailing slash.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use idcache_core::Result;

use super::ExpirationPolicy;
use crate::cache::{CacheStore, DistributedCache};
use crate::keys::{KeyBuilder, normalize_origin};
use crate::storage::ClientStorage;

/// Decides whether cross-origin requests from an origin are allowed.
#[async_trait]
pub trait CorsPolicyService: Send + Sync {
    /// Returns `true` if some client allows `origin`.
    ///
    /// # Errors
    ///
    /// Returns the backing storage error unchanged.
    async fn is_origin_allowed(&self, origin: &str) -> Result<bool>;
}

/// Checks origins against storage on every call.
#[derive(Clone)]
pub struct StorageCorsPolicyService {
    storage: Arc<dyn ClientStorage>,
}

impl StorageCorsPolicyService {
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self {
        Self { storage }
    }

    /// Normalized set of every allowed origin.
    pub async fn allowed_origins(&self) -> Result<Vec<String>> {
        let origins: BTreeSet<String> = self
            .storage
            .all_cors_origins()
            .await?
            .iter()
            .map(|origin| normalize_origin(origin))
            .filter(|origin| !origin.is_empty())
            .collect();
        Ok(origins.into_iter().collect())
    }
}

#[async_trait]
impl CorsPolicyService for StorageCorsPolicyService {
    async fn is_origin_allowed(&self, origin: &str) -> Result<bool> {
        let origin = normalize_origin(origin);
        if origin.is_empty() {
            return Ok(false);
        }
        Ok(self.allowed_origins().await?.contains(&origin))
    }
}

/// Caches the decision per origin and the set of all allowed origins.
///
/// A denied origin counts as a negative result.
pub struct CachingCorsPolicyService {
    inner: StorageCorsPolicyService,
    decisions: DistributedCache<bool>,
    origins: DistributedCache<Vec<String>>,
    keys: KeyBuilder,
    policy: ExpirationPolicy,
}

impl CachingCorsPolicyService {
    pub fn new(
        inner: StorageCorsPolicyService,
        store: Arc<dyn CacheStore>,
        keys: KeyBuilder,
        policy: ExpirationPolicy,
    ) -> Self {
        Self {
            inner,
            decisions: DistributedCache::new(Arc::clone(&store)),
            origins: DistributedCache::new(store),
            keys,
            policy,
        }
    }

    async fn allowed_origins(&self) -> Result<Vec<String>> {
        self.origins
            .get_or_add_with(
                &self.keys.cors_all(),
                || self.inner.allowed_origins(),
                |origins| self.policy.for_list(origins),
            )
            .await
    }

    async fn decide(&self, normalized: &str) -> Result<bool> {
        let origins = self.allowed_origins().await?;
        Ok(origins.iter().any(|origin| origin == normalized))
    }
}

#[async_trait]
impl CorsPolicyService for CachingCorsPolicyService {
    async fn is_origin_allowed(&self, origin: &str) -> Result<bool> {
        let normalized = normalize_origin(origin);
        if normalized.is_empty() {
            return Ok(false);
        }

        let key = self.keys.cors_origin(&normalized);
        let allowed = self
            .decisions
            .get_or_add_with(
                &key,
                || self.decide(&normalized),
                |allowed| self.policy.options(*allowed),
            )
            .await?;

        tracing::debug!(origin = %normalized, allowed, "CORS origin checked");
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntryOptions, LocalCacheStore};
    use idcache_core::Client;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MockOrigins {
        origins: Mutex<Vec<String>>,
        call_count: AtomicUsize,
    }

    impl MockOrigins {
        fn with(origins: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                origins: Mutex::new(origins.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClientStorage for MockOrigins {
        async fn find_by_client_id(&self, _client_id: &str) -> Result<Option<Client>> {
            Ok(None)
        }

        async fn list_all(&self) -> Result<Vec<Client>> {
            Ok(Vec::new())
        }

        async fn all_cors_origins(&self) -> Result<Vec<String>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(self.origins.lock().unwrap().clone())
        }
    }

    fn caching(storage: Arc<MockOrigins>, negative: Option<EntryOptions>) -> (Arc<LocalCacheStore>, CachingCorsPolicyService) {
        let cache = LocalCacheStore::new_shared();
        let service = CachingCorsPolicyService::new(
            StorageCorsPolicyService::new(storage),
            cache.clone(),
            KeyBuilder::default(),
            ExpirationPolicy::new(EntryOptions::absolute(Duration::from_secs(300)), negative),
        );
        (cache, service)
    }

    #[tokio::test]
    async fn test_origin_comparison_is_normalized() {
        let storage = MockOrigins::with(&["https://App.Example.com/"]);
        let service = StorageCorsPolicyService::new(storage);

        assert!(service.is_origin_allowed("https://app.example.com").await.unwrap());
        assert!(service.is_origin_allowed("HTTPS://APP.EXAMPLE.COM/").await.unwrap());
        assert!(!service.is_origin_allowed("https://evil.example.com").await.unwrap());
        assert!(!service.is_origin_allowed("  ").await.unwrap());
    }

    #[tokio::test]
    async fn test_decisions_and_origin_set_are_cached() {
        let storage = MockOrigins::with(&["https://a.example", "https://b.example"]);
        let (cache, service) = caching(storage.clone(), None);

        assert!(service.is_origin_allowed("https://a.example").await.unwrap());
        assert!(service.is_origin_allowed("https://a.example/").await.unwrap());
        assert!(service.is_origin_allowed("https://b.example").await.unwrap());

        // One load of the origin set serves every decision.
        assert_eq!(storage.calls(), 1);
        assert!(cache.contains("cors:all"));
        assert!(cache.contains("cors:origin:https://a.example"));
        assert!(cache.contains("cors:origin:https://b.example"));
    }

    #[tokio::test]
    async fn test_unsorted_origin_set_still_matches() {
        let storage = MockOrigins::with(&[]);
        let (cache, service) = caching(storage.clone(), None);
        let unsorted = serde_json::to_vec(&["https://z.example", "https://a.example"]).unwrap();
        cache
            .set("cors:all", unsorted, &EntryOptions::default())
            .await;

        assert!(service.is_origin_allowed("https://a.example").await.unwrap());
        assert!(service.is_origin_allowed("https://z.example").await.unwrap());
        assert_eq!(storage.calls(), 0);
    }

    #[tokio::test]
    async fn test_denied_origin_follows_negative_policy() {
        let storage = MockOrigins::with(&["https://a.example"]);
        let (cache, service) = caching(storage.clone(), None);

        assert!(!service.is_origin_allowed("https://c.example").await.unwrap());
        assert!(!cache.contains("cors:origin:https://c.example"));

        let negative = Some(EntryOptions::absolute(Duration::from_secs(30)));
        let (cache, service) = caching(storage, negative);
        assert!(!service.is_origin_allowed("https://c.example").await.unwrap());
        assert!(cache.contains("cors:origin:https://c.example"));
    }

    #[tokio::test]
    async fn test_prefix_invalidation_picks_up_new_origin() {
        let storage = MockOrigins::with(&["https://a.example"]);
        let negative = Some(EntryOptions::absolute(Duration::from_secs(30)));
        let (cache, service) = caching(storage.clone(), negative);

        assert!(!service.is_origin_allowed("https://new.example").await.unwrap());

        storage
            .origins
            .lock()
            .unwrap()
            .push("https://new.example".to_string());
        cache.remove_prefix("cors:").await;

        assert!(service.is_origin_allowed("https://new.example").await.unwrap());
    }
}

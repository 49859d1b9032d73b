//! Identity resource, API resource, and API scope lookups.

use std::sync::Arc;

use async_trait::async_trait;
use idcache_core::{ApiResource, ApiScope, EntityType, IdentityResource, Resources, Result};

use super::ExpirationPolicy;
use crate::cache::{CacheStore, DistributedCache};
use crate::keys::{BY_NAME, BY_SCOPE, KeyBuilder};
use crate::storage::ResourceStorage;

/// Resource lookups used by the protocol endpoints.
///
/// An empty name list yields an empty result without touching storage.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_identity_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<IdentityResource>>;

    async fn find_api_scopes_by_name(&self, scope_names: &[String]) -> Result<Vec<ApiScope>>;

    async fn find_api_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<ApiResource>>;

    async fn find_api_resources_by_name(
        &self,
        api_resource_names: &[String],
    ) -> Result<Vec<ApiResource>>;

    /// All identity resources, API resources, and API scopes.
    async fn get_all_resources(&self) -> Result<Resources>;
}

/// Reads resources straight from storage.
#[derive(Clone)]
pub struct StorageResourceStore {
    storage: Arc<dyn ResourceStorage>,
}

impl StorageResourceStore {
    pub fn new(storage: Arc<dyn ResourceStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ResourceStore for StorageResourceStore {
    async fn find_identity_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<IdentityResource>> {
        if scope_names.is_empty() {
            return Ok(Vec::new());
        }
        self.storage
            .find_identity_resources_by_scope_name(scope_names)
            .await
    }

    async fn find_api_scopes_by_name(&self, scope_names: &[String]) -> Result<Vec<ApiScope>> {
        if scope_names.is_empty() {
            return Ok(Vec::new());
        }
        self.storage.find_api_scopes_by_name(scope_names).await
    }

    async fn find_api_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<ApiResource>> {
        if scope_names.is_empty() {
            return Ok(Vec::new());
        }
        self.storage
            .find_api_resources_by_scope_name(scope_names)
            .await
    }

    async fn find_api_resources_by_name(
        &self,
        api_resource_names: &[String],
    ) -> Result<Vec<ApiResource>> {
        if api_resource_names.is_empty() {
            return Ok(Vec::new());
        }
        self.storage
            .find_api_resources_by_name(api_resource_names)
            .await
    }

    async fn get_all_resources(&self) -> Result<Resources> {
        self.storage.get_all_resources().await
    }
}

/// Caches resource lookups.
///
/// Name-list queries are keyed by the canonical (sorted, de-duplicated)
/// list, so `["b", "a"]` and `["a", "b", "a"]` share an entry.
pub struct CachingResourceStore {
    inner: StorageResourceStore,
    identity_resources: DistributedCache<Vec<IdentityResource>>,
    api_scopes: DistributedCache<Vec<ApiScope>>,
    api_resources: DistributedCache<Vec<ApiResource>>,
    all: DistributedCache<Resources>,
    keys: KeyBuilder,
    policy: ExpirationPolicy,
}

impl CachingResourceStore {
    pub fn new(
        inner: StorageResourceStore,
        store: Arc<dyn CacheStore>,
        keys: KeyBuilder,
        policy: ExpirationPolicy,
    ) -> Self {
        Self {
            inner,
            identity_resources: DistributedCache::new(Arc::clone(&store)),
            api_scopes: DistributedCache::new(Arc::clone(&store)),
            api_resources: DistributedCache::new(Arc::clone(&store)),
            all: DistributedCache::new(store),
            keys,
            policy,
        }
    }
}

#[async_trait]
impl ResourceStore for CachingResourceStore {
    async fn find_identity_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<IdentityResource>> {
        if scope_names.is_empty() {
            return Ok(Vec::new());
        }
        let key = self
            .keys
            .query(EntityType::IdentityResource, BY_SCOPE, scope_names);
        self.identity_resources
            .get_or_add_with(
                &key,
                || self.inner.find_identity_resources_by_scope_name(scope_names),
                |found| self.policy.for_list(found),
            )
            .await
    }

    async fn find_api_scopes_by_name(&self, scope_names: &[String]) -> Result<Vec<ApiScope>> {
        if scope_names.is_empty() {
            return Ok(Vec::new());
        }
        let key = self.keys.query(EntityType::ApiScope, BY_NAME, scope_names);
        self.api_scopes
            .get_or_add_with(
                &key,
                || self.inner.find_api_scopes_by_name(scope_names),
                |found| self.policy.for_list(found),
            )
            .await
    }

    async fn find_api_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<ApiResource>> {
        if scope_names.is_empty() {
            return Ok(Vec::new());
        }
        let key = self.keys.query(EntityType::ApiResource, BY_SCOPE, scope_names);
        self.api_resources
            .get_or_add_with(
                &key,
                || self.inner.find_api_resources_by_scope_name(scope_names),
                |found| self.policy.for_list(found),
            )
            .await
    }

    async fn find_api_resources_by_name(
        &self,
        api_resource_names: &[String],
    ) -> Result<Vec<ApiResource>> {
        if api_resource_names.is_empty() {
            return Ok(Vec::new());
        }
        let key = self
            .keys
            .query(EntityType::ApiResource, BY_NAME, api_resource_names);
        self.api_resources
            .get_or_add_with(
                &key,
                || self.inner.find_api_resources_by_name(api_resource_names),
                |found| self.policy.for_list(found),
            )
            .await
    }

    async fn get_all_resources(&self) -> Result<Resources> {
        let key = self.keys.all_resources();
        self.all
            .get_or_add_with(
                &key,
                || self.inner.get_all_resources(),
                |resources| self.policy.options(!resources.is_empty()),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntryOptions, LocalCacheStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MockResourceStorage {
        call_count: AtomicUsize,
    }

    impl MockResourceStorage {
        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        fn api_resources() -> Vec<ApiResource> {
            vec![
                ApiResource::new("orders").with_scope("orders.read"),
                ApiResource::new("billing").with_scope("billing.read"),
            ]
        }
    }

    #[async_trait]
    impl ResourceStorage for MockResourceStorage {
        async fn find_identity_resources_by_scope_name(
            &self,
            scope_names: &[String],
        ) -> Result<Vec<IdentityResource>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(["openid", "profile"]
                .into_iter()
                .filter(|n| scope_names.iter().any(|s| s == n))
                .map(IdentityResource::new)
                .collect())
        }

        async fn find_api_scopes_by_name(&self, scope_names: &[String]) -> Result<Vec<ApiScope>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(scope_names.iter().map(ApiScope::new).collect())
        }

        async fn find_api_resources_by_scope_name(
            &self,
            scope_names: &[String],
        ) -> Result<Vec<ApiResource>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(Self::api_resources()
                .into_iter()
                .filter(|r| r.has_any_scope(scope_names))
                .collect())
        }

        async fn find_api_resources_by_name(
            &self,
            api_resource_names: &[String],
        ) -> Result<Vec<ApiResource>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(Self::api_resources()
                .into_iter()
                .filter(|r| api_resource_names.contains(&r.name))
                .collect())
        }

        async fn get_all_resources(&self) -> Result<Resources> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(Resources {
                api_resources: Self::api_resources(),
                ..Default::default()
            })
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn caching(storage: Arc<MockResourceStorage>) -> (Arc<LocalCacheStore>, CachingResourceStore) {
        let cache = LocalCacheStore::new_shared();
        let store = CachingResourceStore::new(
            StorageResourceStore::new(storage),
            cache.clone(),
            KeyBuilder::default(),
            ExpirationPolicy::new(EntryOptions::absolute(Duration::from_secs(300)), None),
        );
        (cache, store)
    }

    #[tokio::test]
    async fn test_equivalent_name_lists_share_cache_entry() {
        let storage = Arc::new(MockResourceStorage::default());
        let (_, store) = caching(storage.clone());

        let first = store
            .find_api_resources_by_scope_name(&names(&["orders.read", "billing.read"]))
            .await
            .unwrap();
        let second = store
            .find_api_resources_by_scope_name(&names(&["billing.read", "orders.read", "orders.read"]))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(storage.calls(), 1);
    }

    #[tokio::test]
    async fn test_by_name_and_by_scope_are_distinct_entries() {
        let storage = Arc::new(MockResourceStorage::default());
        let (cache, store) = caching(storage.clone());

        let by_name = store
            .find_api_resources_by_name(&names(&["orders"]))
            .await
            .unwrap();
        let by_scope = store
            .find_api_resources_by_scope_name(&names(&["orders"]))
            .await
            .unwrap();

        assert_eq!(by_name.len(), 1);
        assert!(by_scope.is_empty());
        assert_eq!(storage.calls(), 2);
        assert!(cache.contains("api_resource:by_name:orders"));
        // Empty result, negative caching off.
        assert!(!cache.contains("api_resource:by_scope:orders"));
    }

    #[tokio::test]
    async fn test_empty_name_list_skips_storage() {
        let storage = Arc::new(MockResourceStorage::default());
        let (cache, store) = caching(storage.clone());

        assert!(store.find_api_scopes_by_name(&[]).await.unwrap().is_empty());
        assert!(
            store
                .find_identity_resources_by_scope_name(&[])
                .await
                .unwrap()
                .is_empty()
        );

        assert_eq!(storage.calls(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_all_resources_cached_under_aggregate_key() {
        let storage = Arc::new(MockResourceStorage::default());
        let (cache, store) = caching(storage.clone());

        let resources = store.get_all_resources().await.unwrap();
        store.get_all_resources().await.unwrap();

        assert_eq!(resources.api_resources.len(), 2);
        assert_eq!(storage.calls(), 1);
        assert!(cache.contains("resources:all"));
    }

    #[tokio::test]
    async fn test_identity_resources_by_scope() {
        let storage = Arc::new(MockResourceStorage::default());
        let (_, store) = caching(storage.clone());

        let found = store
            .find_identity_resources_by_scope_name(&names(&["openid", "orders.read"]))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "openid");
    }
}

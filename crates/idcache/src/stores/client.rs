//! Client lookups.

use std::sync::Arc;

use async_trait::async_trait;
use idcache_core::{Client, EntityType, Result};

use super::ExpirationPolicy;
use crate::cache::{CacheStore, DistributedCache};
use crate::keys::KeyBuilder;
use crate::storage::ClientStorage;

/// Client lookups used by the protocol endpoints.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Find a client by its client ID.
    ///
    /// Returns `None` if the client doesn't exist. A missing client is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns the backing storage error unchanged.
    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>>;

    /// Every registered client.
    async fn get_all_clients(&self) -> Result<Vec<Client>>;
}

/// Reads clients straight from storage.
#[derive(Clone)]
pub struct StorageClientStore {
    storage: Arc<dyn ClientStorage>,
}

impl StorageClientStore {
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ClientStore for StorageClientStore {
    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>> {
        self.storage.find_by_client_id(client_id).await
    }

    async fn get_all_clients(&self) -> Result<Vec<Client>> {
        self.storage.list_all().await
    }
}

/// Caches client lookups under `client:id:{id}` and `client:all`.
pub struct CachingClientStore {
    inner: StorageClientStore,
    by_id: DistributedCache<Option<Client>>,
    all: DistributedCache<Vec<Client>>,
    keys: KeyBuilder,
    policy: ExpirationPolicy,
}

impl CachingClientStore {
    pub fn new(
        inner: StorageClientStore,
        store: Arc<dyn CacheStore>,
        keys: KeyBuilder,
        policy: ExpirationPolicy,
    ) -> Self {
        Self {
            inner,
            by_id: DistributedCache::new(Arc::clone(&store)),
            all: DistributedCache::new(store),
            keys,
            policy,
        }
    }
}

#[async_trait]
impl ClientStore for CachingClientStore {
    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>> {
        let key = self.keys.entity(EntityType::Client, client_id);
        self.by_id
            .get_or_add_with(
                &key,
                || self.inner.find_client_by_id(client_id),
                |client| self.policy.for_option(client),
            )
            .await
    }

    async fn get_all_clients(&self) -> Result<Vec<Client>> {
        let key = self.keys.collection(EntityType::Client);
        self.all
            .get_or_add_with(
                &key,
                || self.inner.get_all_clients(),
                |clients| self.policy.for_list(clients),
            )
            .await
    }
}

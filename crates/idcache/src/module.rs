//! Startup wiring.
//!
//! [`IdentityCache`] assembles the read-through stores, the invalidator,
//! and the cleanup worker from configuration and backing storages. The
//! caching or pass-through stores are chosen once, here.

use std::sync::Arc;
use std::time::Duration;

use idcache_core::{Error, InstanceId, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{CacheStore, LocalCacheStore};
use crate::channel::EventChannel;
use crate::cleanup::{TokenCleanupService, TokenCleanupWorker};
use crate::config::IdCacheConfig;
use crate::invalidation::{CacheInvalidator, KeyRegistry};
use crate::keys::KeyBuilder;
use crate::storage::{ClientStorage, ExpiredRecordStorage, ResourceStorage};
use crate::stores::{
    CachingClientStore, CachingCorsPolicyService, CachingResourceStore, ClientStore,
    CorsPolicyService, ExpirationPolicy, ResourceStore, StorageClientStore,
    StorageCorsPolicyService, StorageResourceStore,
};

/// Builder for [`IdentityCache`].
pub struct IdentityCacheBuilder {
    config: IdCacheConfig,
    instance: Option<InstanceId>,
    client_storage: Option<Arc<dyn ClientStorage>>,
    resource_storage: Option<Arc<dyn ResourceStorage>>,
    cleanup_targets: Vec<Arc<dyn ExpiredRecordStorage>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    channel: Option<Arc<dyn EventChannel>>,
}

impl IdentityCacheBuilder {
    /// Identifier of this instance. A random one is generated if unset.
    pub fn instance(mut self, instance: InstanceId) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn client_storage(mut self, storage: Arc<dyn ClientStorage>) -> Self {
        self.client_storage = Some(storage);
        self
    }

    pub fn resource_storage(mut self, storage: Arc<dyn ResourceStorage>) -> Self {
        self.resource_storage = Some(storage);
        self
    }

    /// Add a storage whose expired records the cleanup worker deletes.
    pub fn cleanup_target(mut self, target: Arc<dyn ExpiredRecordStorage>) -> Self {
        self.cleanup_targets.push(target);
        self
    }

    /// Cache tier. Defaults to a per-instance [`LocalCacheStore`].
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Channel carrying change events between instances. Without one,
    /// cached entries only expire by TTL.
    pub fn event_channel(mut self, channel: Arc<dyn EventChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Validate the configuration and assemble the stores.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid or a
    /// backing storage is missing.
    pub fn build(self) -> Result<IdentityCache> {
        self.config
            .validate()
            .map_err(|e| Error::configuration(e.to_string()))?;

        let client_storage = self
            .client_storage
            .ok_or_else(|| Error::configuration("client storage is required"))?;
        let resource_storage = self
            .resource_storage
            .ok_or_else(|| Error::configuration("resource storage is required"))?;

        let instance = self.instance.unwrap_or_else(InstanceId::generate);
        let cache_config = &self.config.cache;
        let keys = KeyBuilder::new(cache_config.key_prefix.clone());

        let plain_clients = StorageClientStore::new(Arc::clone(&client_storage));
        let plain_resources = StorageResourceStore::new(resource_storage);
        let plain_cors = StorageCorsPolicyService::new(client_storage);

        let (clients, resources, cors, caching): (
            Arc<dyn ClientStore>,
            Arc<dyn ResourceStore>,
            Arc<dyn CorsPolicyService>,
            Option<Caching>,
        ) = if cache_config.enabled {
            let store = self
                .cache_store
                .unwrap_or_else(|| LocalCacheStore::new_shared() as Arc<dyn CacheStore>);
            let registry = Arc::new(KeyRegistry::builtin(keys.clone()));
            let invalidator = Arc::new(CacheInvalidator::new(
                Arc::clone(&store),
                registry,
                instance,
            ));

            (
                Arc::new(CachingClientStore::new(
                    plain_clients,
                    Arc::clone(&store),
                    keys.clone(),
                    ExpirationPolicy::from_config(cache_config, cache_config.client_ttl()),
                )),
                Arc::new(CachingResourceStore::new(
                    plain_resources,
                    Arc::clone(&store),
                    keys.clone(),
                    ExpirationPolicy::from_config(cache_config, cache_config.resource_ttl()),
                )),
                Arc::new(CachingCorsPolicyService::new(
                    plain_cors,
                    Arc::clone(&store),
                    keys,
                    ExpirationPolicy::from_config(cache_config, cache_config.cors_ttl()),
                )),
                Some(Caching { store, invalidator }),
            )
        } else {
            (
                Arc::new(plain_clients),
                Arc::new(plain_resources),
                Arc::new(plain_cors),
                None,
            )
        };

        let cleanup = Arc::new(TokenCleanupService::from_config(
            self.cleanup_targets,
            &self.config.cleanup,
        ));

        tracing::info!(
            instance = %instance.as_uuid(),
            caching = caching.is_some(),
            distributed = self.channel.is_some(),
            cleanup = self.config.cleanup.enabled,
            "Identity cache configured"
        );

        Ok(IdentityCache {
            instance,
            config: self.config,
            clients,
            resources,
            cors,
            caching,
            channel: self.channel,
            cleanup,
        })
    }
}

struct Caching {
    store: Arc<dyn CacheStore>,
    invalidator: Arc<CacheInvalidator>,
}

/// The assembled caching and cleanup core of one server instance.
pub struct IdentityCache {
    instance: InstanceId,
    config: IdCacheConfig,
    clients: Arc<dyn ClientStore>,
    resources: Arc<dyn ResourceStore>,
    cors: Arc<dyn CorsPolicyService>,
    caching: Option<Caching>,
    channel: Option<Arc<dyn EventChannel>>,
    cleanup: Arc<TokenCleanupService>,
}

impl IdentityCache {
    pub fn builder(config: IdCacheConfig) -> IdentityCacheBuilder {
        IdentityCacheBuilder {
            config,
            instance: None,
            client_storage: None,
            resource_storage: None,
            cleanup_targets: Vec::new(),
            cache_store: None,
            channel: None,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn config(&self) -> &IdCacheConfig {
        &self.config
    }

    pub fn clients(&self) -> Arc<dyn ClientStore> {
        Arc::clone(&self.clients)
    }

    pub fn resources(&self) -> Arc<dyn ResourceStore> {
        Arc::clone(&self.resources)
    }

    pub fn cors(&self) -> Arc<dyn CorsPolicyService> {
        Arc::clone(&self.cors)
    }

    /// The cache tier, or `None` when caching is disabled.
    pub fn cache_store(&self) -> Option<Arc<dyn CacheStore>> {
        self.caching.as_ref().map(|c| Arc::clone(&c.store))
    }

    /// The invalidator, or `None` when caching is disabled.
    pub fn invalidator(&self) -> Option<Arc<CacheInvalidator>> {
        self.caching.as_ref().map(|c| Arc::clone(&c.invalidator))
    }

    pub fn cleanup_service(&self) -> Arc<TokenCleanupService> {
        Arc::clone(&self.cleanup)
    }

    /// Spawn the background tasks: invalidator, cleanup worker, and local
    /// purge. All of them stop once `shutdown` becomes `true`.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::default();

        if let Some(caching) = &self.caching {
            match &self.channel {
                Some(channel) => {
                    let subscription = channel.subscribe();
                    tasks.push(
                        "cache_invalidator",
                        Arc::clone(&caching.invalidator).start(subscription, shutdown.clone()),
                    );
                }
                None => {
                    tracing::warn!("No event channel configured, cache entries expire by TTL only");
                }
            }

            let purge_interval = self.config.cache.purge_interval;
            if !purge_interval.is_zero() {
                tasks.push(
                    "cache_purge",
                    spawn_purge_task(Arc::clone(&caching.store), purge_interval, shutdown.clone()),
                );
            }
        }

        let worker = TokenCleanupWorker::new(Arc::clone(&self.cleanup), self.config.cleanup.clone());
        if let Some(handle) = worker.start(shutdown) {
            tasks.push("token_cleanup", handle);
        }

        tasks
    }
}

/// Periodically drop expired entries from the cache tier.
fn spawn_purge_task(
    store: Arc<dyn CacheStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let removed = store.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Purged expired cache entries");
                    }
                }
            }
        }
    })
}

/// Handles of spawned background tasks.
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    /// Names of the running tasks.
    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task to finish.
    pub async fn join(self) {
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Background task failed");
            }
        }
    }
}

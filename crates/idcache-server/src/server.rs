use std::future::Future;
use std::sync::Arc;

use idcache::{EventChannel, IdentityCache};
use idcache_core::{InstanceId, Result};
use idcache_memory::{LocalEventBus, MemoryStore};
use tokio::sync::watch;

use crate::cache::{self, RedisCacheStore};
use crate::config::AppConfig;
use crate::events::RedisEventChannel;
use crate::seed;

/// A running idcache instance: in-memory backing store, cache stores, and
/// the optional Redis tier.
pub struct Server {
    config: AppConfig,
    store: Arc<MemoryStore>,
    cache: IdentityCache,
    redis_channel: Option<Arc<RedisEventChannel>>,
}

impl Server {
    /// Connect to Redis (if enabled), seed the store, and assemble the caches.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the cache configuration is invalid.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let instance = config
            .instance
            .id
            .map(InstanceId::from_uuid)
            .unwrap_or_else(InstanceId::generate);

        let pool = cache::connect(&config.redis).await;

        let (events, redis_channel): (Arc<dyn EventChannel>, Option<Arc<RedisEventChannel>>) =
            match &pool {
                Some(pool) => {
                    let channel = Arc::new(RedisEventChannel::new(
                        pool.clone(),
                        config.redis.url.clone(),
                        config.redis.channel.clone(),
                    ));
                    (channel.clone(), Some(channel))
                }
                None => (Arc::new(LocalEventBus::default()), None),
            };

        let store = Arc::new(MemoryStore::with_events(Arc::clone(&events), instance));
        if !config.seed.is_empty() {
            seed::apply(&store, &config.seed).await;
        }

        let mut builder = IdentityCache::builder(config.idcache.clone())
            .instance(instance)
            .client_storage(store.clone())
            .resource_storage(store.clone())
            .cleanup_target(store.grant_cleanup_target())
            .cleanup_target(store.device_code_cleanup_target())
            .event_channel(events);

        if let Some(pool) = pool {
            builder = builder.cache_store(Arc::new(RedisCacheStore::new(
                pool,
                config.redis.key_prefix.clone(),
                config.redis.local_ttl,
            )));
        }

        let cache = builder.build()?;
        if let Some(invalidator) = cache.invalidator() {
            store.attach_invalidator(invalidator);
        }

        tracing::info!(
            instance = %instance.as_uuid(),
            name = %config.instance.name,
            caching = config.idcache.cache.enabled,
            redis = redis_channel.is_some(),
            "idcache instance assembled"
        );

        Ok(Self {
            config,
            store,
            cache,
            redis_channel,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Backing store. Writes through it publish change events.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Run the background tasks until `signal` completes, then stop them.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = self
            .redis_channel
            .as_ref()
            .map(|channel| Arc::clone(channel).start(shutdown_rx.clone()));
        let tasks = self.cache.start(shutdown_rx);
        tracing::info!(tasks = ?tasks.names(), "Background tasks started");

        signal.await;
        tracing::info!("Shutting down");

        let _ = shutdown_tx.send(true);
        tasks.join().await;
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                tracing::error!(error = %e, "Redis event listener failed");
            }
        }

        tracing::info!("Shutdown complete");
    }
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedClient;
    use idcache_core::Client;
    use std::time::Duration;

    fn seed_client(id: &str, origin: &str) -> SeedClient {
        SeedClient {
            client_id: id.into(),
            name: None,
            enabled: true,
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            allowed_cors_origins: vec![origin.into()],
            allowed_scopes: Vec::new(),
            allowed_grant_types: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_build_serves_seeded_clients() {
        let mut config = AppConfig::default();
        config.seed.clients.push(seed_client("spa", "https://spa.example"));

        let server = Server::build(config).await.unwrap();
        let client = server
            .cache()
            .clients()
            .find_client_by_id("spa")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(client.name, "spa");
        assert!(
            server
                .cache()
                .cors()
                .is_origin_allowed("https://spa.example")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_own_writes_are_visible_without_background_tasks() {
        let mut config = AppConfig::default();
        config.seed.clients.push(seed_client("spa", "https://spa.example"));
        let server = Server::build(config).await.unwrap();
        let clients = server.cache().clients();

        assert_eq!(clients.find_client_by_id("spa").await.unwrap().unwrap().name, "spa");
        server.store().upsert_client(Client::new("spa", "Renamed")).await;

        assert_eq!(
            clients.find_client_by_id("spa").await.unwrap().unwrap().name,
            "Renamed"
        );
    }

    #[tokio::test]
    async fn test_writes_invalidate_while_running() {
        let server = Server::build(AppConfig::default()).await.unwrap();
        let store = server.store().clone();
        let clients = server.cache().clients();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));
        // Let the spawned task subscribe before anything is published.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(clients.find_client_by_id("app1").await.unwrap().is_none());
        store.upsert_client(Client::new("app1", "App One")).await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while clients.find_client_by_id("app1").await.unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();
    }
}

//! Typed get-or-populate cache with single-flight population.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use idcache_core::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use super::entry::EntryOptions;
use super::store::CacheStore;
use crate::keys::CacheKey;
use crate::metrics;

/// Outcome of one population, shared by every caller waiting on it.
type Flight = Arc<OnceCell<Result<Arc<Vec<u8>>>>>;

/// Read-through cache for values of type `T`.
///
/// Values are stored as JSON in a [`CacheStore`]. On a miss, concurrent
/// callers for the same key share one in-flight population: the factory is
/// invoked once and every caller receives the same value or the same error.
/// Errors are never cached.
///
/// Cloning is cheap and clones share in-flight state, so one instance per
/// value type should be shared by everything that populates those keys.
///
/// # Example
///
/// ```ignore
/// let cache: DistributedCache<Option<Client>> = DistributedCache::new(store);
/// let client = cache
///     .get_or_add(&key, || storage.find_by_client_id("app1"), EntryOptions::default())
///     .await?;
/// ```
pub struct DistributedCache<T> {
    store: Arc<dyn CacheStore>,
    flights: Arc<DashMap<String, Flight>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DistributedCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            flights: Arc::clone(&self.flights),
            _marker: PhantomData,
        }
    }
}

impl<T> DistributedCache<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    /// Create a cache over `store`.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            flights: Arc::new(DashMap::new()),
            _marker: PhantomData,
        }
    }

    /// The underlying byte store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Get the value under `key` without populating.
    ///
    /// An entry that no longer decodes as `T` is removed and reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<T> {
        let bytes = self.store.get(key.as_str()).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                self.store.remove(key.as_str()).await;
                None
            }
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub async fn set(&self, key: &CacheKey, value: &T, options: EntryOptions) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key.as_str(), bytes, &options).await;
        Ok(())
    }

    /// Remove the entry under `key`. Removing an absent key is a no-op.
    pub async fn remove(&self, key: &CacheKey) {
        self.store.remove(key.as_str()).await;
    }

    /// Remove several entries.
    pub async fn remove_many<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) {
        for key in keys {
            self.store.remove(key.as_str()).await;
        }
    }

    /// Number of keys currently being populated.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Return the cached value, or populate it with `factory` and cache it
    /// with `options`.
    ///
    /// # Errors
    ///
    /// Returns the factory's error unchanged; nothing is cached in that case.
    pub async fn get_or_add<F, Fut>(&self, key: &CacheKey, factory: F, options: EntryOptions) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_or_add_with(key, factory, move |_| Some(options))
            .await
    }

    /// Like [`get_or_add`](Self::get_or_add), but `policy` chooses the entry
    /// options from the produced value. `None` returns the value without
    /// caching it.
    ///
    /// # Errors
    ///
    /// Returns the factory's error unchanged; nothing is cached in that case.
    pub async fn get_or_add_with<F, Fut, P>(&self, key: &CacheKey, factory: F, policy: P) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: FnOnce(&T) -> Option<EntryOptions>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let flight: Flight = self
            .flights
            .entry(key.as_str().to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let guard = FlightGuard {
            flights: &self.flights,
            key: key.as_str(),
            flight,
        };

        let outcome = guard
            .flight
            .get_or_init(|| self.populate(key, factory, policy))
            .await
            .clone();
        drop(guard);

        let bytes = outcome?;
        serde_json::from_slice(&bytes).map_err(Error::from)
    }

    async fn populate<F, Fut, P>(&self, key: &CacheKey, factory: F, policy: P) -> Result<Arc<Vec<u8>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: FnOnce(&T) -> Option<EntryOptions>,
    {
        // A flight that finished between our miss and joining may have
        // filled the entry already.
        if let Some(bytes) = self.store.get(key.as_str()).await {
            if serde_json::from_slice::<T>(&bytes).is_ok() {
                return Ok(bytes);
            }
        }

        metrics::record_population();
        let value = factory().await.inspect_err(|e| {
            tracing::debug!(key = %key, error = %e, "Cache population failed");
        })?;

        let bytes = Arc::new(serde_json::to_vec(&value)?);
        match policy(&value) {
            Some(options) => {
                self.store
                    .set(key.as_str(), bytes.as_ref().clone(), &options)
                    .await;
                tracing::debug!(key = %key, ttl = ?options.initial_ttl(), "Cache populated");
            }
            None => {
                tracing::debug!(key = %key, "Cache population not stored by policy");
            }
        }

        Ok(bytes)
    }
}

/// Retires a flight when its caller finishes or is cancelled, so later
/// misses start a fresh population.
///
/// Only this flight is removed; a newer one may already be registered. An
/// unfilled flight is kept while other callers still wait on it, since one
/// of them takes over the population.
struct FlightGuard<'a> {
    flights: &'a DashMap<String, Flight>,
    key: &'a str,
    flight: Flight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // The map and this guard hold two references. Counted under the
        // shard lock, so no caller can join concurrently.
        self.flights.remove_if(self.key, |_, current| {
            Arc::ptr_eq(current, &self.flight)
                && (current.initialized() || Arc::strong_count(current) <= 2)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCacheStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cache<T: Serialize + DeserializeOwned + Send>() -> (Arc<LocalCacheStore>, DistributedCache<T>) {
        let store = LocalCacheStore::new_shared();
        let cache = DistributedCache::new(store.clone() as Arc<dyn CacheStore>);
        (store, cache)
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::from_raw(s)
    }

    #[tokio::test]
    async fn test_hit_does_not_call_factory() {
        let (_, cache) = cache::<String>();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        cache
            .set(&key("k"), &"cached".to_string(), EntryOptions::default())
            .await
            .unwrap();

        let value = cache
            .get_or_add(
                &key("k"),
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("loaded".to_string())
                },
                EntryOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(value, "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_miss_populates_and_caches() {
        let (store, cache) = cache::<u32>();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..3 {
            let value = cache
                .get_or_add(
                    &key("k"),
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(42)
                    },
                    EntryOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.contains("k"));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_for_concurrent_misses() {
        let (_, cache) = cache::<Vec<String>>();
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_add(
                            &key("all"),
                            || async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                Ok(vec!["a".to_string(), "b".to_string()])
                            },
                            EntryOptions::default(),
                        )
                        .await
                })
            })
            .collect();

        for task in tasks {
            let value = task.await.unwrap().unwrap();
            assert_eq!(value, vec!["a".to_string(), "b".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_followers_share_leader_error() {
        let (store, cache) = cache::<u32>();
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_add(
                            &key("k"),
                            || async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                Err(Error::storage("database unavailable"))
                            },
                            EntryOptions::default(),
                        )
                        .await
                })
            })
            .collect();

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert_eq!(err, Error::storage("database unavailable"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn test_cancelled_flight_is_retired() {
        let (_, cache) = cache::<u32>();
        let stuck = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_add(
                        &key("k"),
                        || std::future::pending::<Result<u32>>(),
                        EntryOptions::default(),
                    )
                    .await
            })
        };
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        stuck.abort();
        assert!(stuck.await.unwrap_err().is_cancelled());
        assert_eq!(cache.in_flight(), 0);

        let value = cache
            .get_or_add(&key("k"), || async { Ok(3) }, EntryOptions::default())
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_error_is_not_cached() {
        let (_, cache) = cache::<u32>();

        let err = cache
            .get_or_add(
                &key("k"),
                || async { Err(Error::storage("timeout")) },
                EntryOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));

        let value = cache
            .get_or_add(&key("k"), || async { Ok(7) }, EntryOptions::default())
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_policy_can_skip_caching() {
        let (store, cache) = cache::<Option<String>>();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..2 {
            let value = cache
                .get_or_add_with(
                    &key("k"),
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    },
                    |value: &Option<String>| value.as_ref().map(|_| EntryOptions::default()),
                )
                .await
                .unwrap();
            assert_eq!(value, None);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!store.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_expiration_repopulates() {
        let (_, cache) = cache::<u32>();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let options = EntryOptions::absolute(Duration::from_secs(30));

        let load = || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) as u32) };

        assert_eq!(cache.get_or_add(&key("k"), load, options).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get_or_add(&key("k"), load, options).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_or_add(&key("k"), load, options).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_treated_as_miss() {
        let (store, cache) = cache::<u32>();
        store
            .set("k", b"\"not a number\"".to_vec(), &EntryOptions::default())
            .await;

        let value = cache
            .get_or_add(&key("k"), || async { Ok(5) }, EntryOptions::default())
            .await
            .unwrap();

        assert_eq!(value, 5);
        assert_eq!(cache.get(&key("k")).await, Some(5));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (store, cache) = cache::<u32>();
        cache.set(&key("k"), &1, EntryOptions::default()).await.unwrap();

        cache.remove(&key("k")).await;
        cache.remove(&key("k")).await;
        cache.remove(&key("never-set")).await;

        assert!(store.is_empty());
    }
}

//! Cache invalidator.
//!
//! Consumes change events and removes every cache key derived from the
//! changed entity. Events are handled the same way whichever instance
//! published them, including this one. A write made through this instance
//! is also applied directly with [`CacheInvalidator::apply_local`] before
//! the write returns, so the writer never reads its own stale entries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use idcache_core::{ChangeEvent, InstanceId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::registry::KeyRegistry;
use crate::cache::CacheStore;
use crate::channel::{EventSubscription, Received};
use crate::metrics;

// =============================================================================
// Statistics
// =============================================================================

/// Invalidator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidatorStats {
    /// Events received from the channel.
    pub events_received: u64,
    /// Events that removed at least one key or prefix.
    pub events_applied: u64,
    /// Events for entity types with no cached keys.
    pub events_ignored: u64,
    /// Events received from this instance.
    pub own_events: u64,
    /// Full flushes after lost events.
    pub full_flushes: u64,
    /// Local writes applied before their event went out.
    pub local_writes: u64,
}

#[derive(Default)]
struct Counters {
    events_received: AtomicU64,
    events_applied: AtomicU64,
    events_ignored: AtomicU64,
    own_events: AtomicU64,
    full_flushes: AtomicU64,
    local_writes: AtomicU64,
}

// =============================================================================
// Invalidator
// =============================================================================

/// Removes stale cache entries in response to change events.
pub struct CacheInvalidator {
    store: Arc<dyn CacheStore>,
    registry: Arc<KeyRegistry>,
    instance: InstanceId,
    counters: Counters,
}

impl CacheInvalidator {
    pub fn new(store: Arc<dyn CacheStore>, registry: Arc<KeyRegistry>, instance: InstanceId) -> Self {
        Self {
            store,
            registry,
            instance,
            counters: Counters::default(),
        }
    }

    /// Remove every key derived from the changed entity.
    ///
    /// Returns `false` if the entity type has no cached keys.
    pub async fn handle(&self, event: &ChangeEvent) -> bool {
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);
        if event.is_from(self.instance) {
            self.counters.own_events.fetch_add(1, Ordering::Relaxed);
        }

        let applied = self.invalidate(event).await;
        if applied {
            self.counters.events_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.events_ignored.fetch_add(1, Ordering::Relaxed);
        }
        applied
    }

    /// Invalidate for a write made through this instance, ahead of the
    /// channel round trip. The same event arriving later is a no-op.
    pub async fn apply_local(&self, event: &ChangeEvent) -> bool {
        let applied = self.invalidate(event).await;
        if applied {
            self.counters.local_writes.fetch_add(1, Ordering::Relaxed);
        }
        applied
    }

    async fn invalidate(&self, event: &ChangeEvent) -> bool {
        let Some(plan) = self.registry.plan(event) else {
            tracing::debug!(
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                "No cached keys for entity type, ignoring change event"
            );
            return false;
        };

        for key in &plan.keys {
            self.store.remove(key.as_str()).await;
        }
        let mut prefixed = 0;
        for prefix in &plan.prefixes {
            prefixed += self.store.remove_prefix(prefix).await;
        }

        metrics::record_invalidation(event.entity_type.as_str());
        tracing::debug!(
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            operation = event.operation.as_str(),
            keys = plan.keys.len(),
            prefixed,
            "Cache invalidated"
        );

        true
    }

    /// Remove everything under every registered namespace.
    ///
    /// Used when events may have been lost.
    pub async fn flush_all(&self) -> usize {
        let mut removed = 0;
        for namespace in self.registry.namespaces() {
            removed += self.store.remove_prefix(&namespace).await;
        }
        self.counters.full_flushes.fetch_add(1, Ordering::Relaxed);
        tracing::info!(removed, "Cache flushed");
        removed
    }

    /// Consume `subscription` until `shutdown` becomes `true` or the
    /// channel closes.
    #[tracing::instrument(name = "cache_invalidator", skip_all, fields(instance = %self.instance.as_uuid()))]
    pub async fn run(&self, mut subscription: EventSubscription, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Cache invalidator started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                received = subscription.recv() => match received {
                    Received::Event(event) => {
                        self.handle(&event).await;
                    }
                    Received::Lagged(missed) => {
                        tracing::warn!(missed, "Invalidation events lost, flushing cache");
                        self.flush_all().await;
                    }
                    Received::Resync => {
                        tracing::warn!("Event channel reconnected, flushing cache");
                        self.flush_all().await;
                    }
                    Received::Closed => {
                        tracing::warn!("Event channel closed, invalidator stopping");
                        break;
                    }
                },
            }
        }

        tracing::info!("Cache invalidator stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn start(
        self: Arc<Self>,
        subscription: EventSubscription,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(subscription, shutdown).await })
    }

    /// Get invalidator statistics.
    pub fn stats(&self) -> InvalidatorStats {
        InvalidatorStats {
            events_received: self.counters.events_received.load(Ordering::Relaxed),
            events_applied: self.counters.events_applied.load(Ordering::Relaxed),
            events_ignored: self.counters.events_ignored.load(Ordering::Relaxed),
            own_events: self.counters.own_events.load(Ordering::Relaxed),
            full_flushes: self.counters.full_flushes.load(Ordering::Relaxed),
            local_writes: self.counters.local_writes.load(Ordering::Relaxed),
        }
    }
}

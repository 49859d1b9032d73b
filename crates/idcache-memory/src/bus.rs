//! In-process event bus.

use async_trait::async_trait;
use idcache::channel::{ChannelMessage, DEFAULT_CHANNEL_CAPACITY, EventChannel, EventSubscription};
use idcache_core::{ChangeEvent, Result};
use tokio::sync::broadcast;

/// Broadcast channel for change events between caches in one process.
///
/// Every subscriber receives every event published after it subscribed.
/// Slow subscribers that fall more than `capacity` events behind observe a
/// lag instead of blocking publishers.
pub struct LocalEventBus {
    sender: broadcast::Sender<ChannelMessage>,
}

impl LocalEventBus {
    /// Create a bus buffering up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl EventChannel for LocalEventBus {
    async fn publish(&self, event: ChangeEvent) -> Result<()> {
        // No subscribers means nothing is cached anywhere; dropping is fine.
        let delivered = self.sender.send(ChannelMessage::Event(event)).unwrap_or(0);
        tracing::trace!(delivered, "Change event published");
        Ok(())
    }

    fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.sender.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idcache::channel::Received;
    use idcache_core::{EntityType, InstanceId};

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = LocalEventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = ChangeEvent::updated(EntityType::Client, "app1", InstanceId::generate());
        bus.publish(event.clone()).await.unwrap();

        assert_eq!(a.recv().await, Received::Event(event.clone()));
        assert_eq!(b.recv().await, Received::Event(event));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = LocalEventBus::default();
        let event = ChangeEvent::deleted(EntityType::ApiScope, "s", InstanceId::generate());
        assert!(bus.publish(event).await.is_ok());
    }
}

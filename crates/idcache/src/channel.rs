//! Event channel between instances.
//!
//! Writers publish a [`ChangeEvent`] after the backing store commits;
//! every instance subscribes and feeds its invalidator. Delivery is
//! at-least-once with no ordering across entity ids.

use async_trait::async_trait;
use idcache_core::{ChangeEvent, Result};
use tokio::sync::broadcast;

/// Default capacity of broadcast-backed channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Transport for entity change events.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Publish an event to every subscriber, including this instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::Channel` if the transport rejected the event.
    async fn publish(&self, event: ChangeEvent) -> Result<()>;

    /// Subscribe to events published after this call.
    fn subscribe(&self) -> EventSubscription;
}

/// Message fanned out to subscribers by a channel implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// An entity changed.
    Event(ChangeEvent),
    /// The transport reconnected; events published meanwhile may be lost.
    Resync,
}

/// Result of waiting on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The next event.
    Event(ChangeEvent),
    /// The subscriber fell behind and this many events were dropped.
    Lagged(u64),
    /// The transport lost events of unknown number.
    Resync,
    /// The channel closed; no more events will arrive.
    Closed,
}

/// Receiving half of an [`EventChannel`].
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<ChannelMessage>,
}

impl EventSubscription {
    pub fn new(receiver: broadcast::Receiver<ChannelMessage>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Received {
        match self.receiver.recv().await {
            Ok(ChannelMessage::Event(event)) => Received::Event(event),
            Ok(ChannelMessage::Resync) => Received::Resync,
            Err(broadcast::error::RecvError::Lagged(n)) => Received::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => Received::Closed,
        }
    }
}

impl From<broadcast::Receiver<ChannelMessage>> for EventSubscription {
    fn from(receiver: broadcast::Receiver<ChannelMessage>) -> Self {
        Self::new(receiver)
    }
}

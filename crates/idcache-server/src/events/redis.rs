//! Redis pub/sub transport for change events.
//!
//! Events are published as JSON on one channel. Every instance, the
//! publisher included, subscribes and fans messages out to its local
//! subscribers. When the subscription drops, the listener reconnects with
//! exponential backoff and tells subscribers to resync, since events
//! published while disconnected are gone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, redis::AsyncCommands};
use futures_util::StreamExt;
use idcache::channel::{ChannelMessage, DEFAULT_CHANNEL_CAPACITY, EventChannel, EventSubscription};
use idcache_core::{ChangeEvent, Error, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Errors that can occur on the Redis event channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis subscribe error: {0}")]
    Subscribe(String),

    #[error("Redis publish error: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis pub/sub stream ended")]
    StreamEnded,
}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        Error::channel(e.to_string())
    }
}

/// [`EventChannel`] over Redis pub/sub.
///
/// [`subscribe`](EventChannel::subscribe) only yields events once the
/// listener is running; see [`start`](Self::start).
pub struct RedisEventChannel {
    pool: Pool,
    redis_url: String,
    channel: String,
    sender: broadcast::Sender<ChannelMessage>,
}

impl RedisEventChannel {
    /// Create a channel publishing through `pool` and subscribing on a
    /// dedicated connection to `redis_url`.
    pub fn new(pool: Pool, redis_url: impl Into<String>, channel: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            pool,
            redis_url: redis_url.into(),
            channel: channel.into(),
            sender,
        }
    }

    /// Name of the pub/sub channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Spawn the listener. It runs until `shutdown` becomes `true`.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    #[tracing::instrument(name = "redis_event_listener", skip_all, fields(channel = %self.channel))]
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = INITIAL_BACKOFF;
        let mut subscribed_before = false;

        loop {
            let result = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                result = self.listen(&mut subscribed_before, &mut backoff) => result,
            };

            let e = result.err().unwrap_or(ChannelError::StreamEnded);
            error!(
                error = %e,
                backoff_secs = backoff.as_secs(),
                "Redis event listener error, reconnecting..."
            );

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        info!("Redis event listener stopped");
    }

    /// Subscribe and forward messages until the stream fails.
    async fn listen(
        &self,
        subscribed_before: &mut bool,
        backoff: &mut Duration,
    ) -> std::result::Result<(), ChannelError> {
        // Pooled connections can't SUBSCRIBE; use a dedicated one.
        let client = ::redis::Client::open(self.redis_url.as_str())
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| ChannelError::Subscribe(e.to_string()))?;

        info!("Subscribed to Redis event channel");
        if *subscribed_before {
            let _ = self.sender.send(ChannelMessage::Resync);
        }
        *subscribed_before = true;
        *backoff = INITIAL_BACKOFF;

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => self.dispatch(&payload),
                Err(e) => warn!(error = %e, "Failed to read Redis event payload"),
            }
        }

        warn!("Redis pub/sub stream ended");
        Err(ChannelError::StreamEnded)
    }

    /// Forward one received payload to local subscribers.
    fn dispatch(&self, payload: &str) {
        match ChangeEvent::from_payload(payload) {
            Ok(event) => {
                debug!(
                    entity_type = %event.entity_type,
                    entity_id = %event.entity_id,
                    "Received change event from Redis"
                );
                let _ = self.sender.send(ChannelMessage::Event(event));
            }
            Err(e) => {
                warn!(error = %e, payload = %payload, "Failed to deserialize Redis event");
            }
        }
    }

    async fn publish_raw(&self, event: &ChangeEvent) -> std::result::Result<(), ChannelError> {
        let message = event
            .to_payload()
            .map_err(|e| ChannelError::Serialization(e.to_string()))?;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ChannelError::Pool(e.to_string()))?;

        let _: () = conn
            .publish(&self.channel, &message)
            .await
            .map_err(|e| ChannelError::Publish(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl EventChannel for RedisEventChannel {
    async fn publish(&self, event: ChangeEvent) -> Result<()> {
        self.publish_raw(&event).await?;
        debug!(
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            "Published change event to Redis"
        );
        Ok(())
    }

    fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.sender.subscribe())
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

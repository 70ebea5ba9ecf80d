//! Shared pub/sub layer
//!
//! The multiplexer talks to the pub/sub substrate through the
//! [`PubSubLayer`] trait. [`RedisPubSubLayer`] is the multi-process backend;
//! [`MemoryPubSubLayer`] serves single-node deployments and tests. Both are
//! injected at startup with an explicit handle, never reached through a
//! process-global.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Capacity of in-memory topic channels. Slow subscribers that fall behind
/// will skip messages (RecvError::Lagged).
const MEMORY_TOPIC_CAPACITY: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("message broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("failed to encode broker payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// An established per-room subscription.
///
/// Payloads published to the room's topic arrive through [`recv`]; dropping
/// the subscription tears down the underlying feed.
///
/// [`recv`]: Subscription::recv
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl Subscription {
    fn new(receiver: mpsc::UnboundedReceiver<Vec<u8>>, task: JoinHandle<()>) -> Self {
        Self { receiver, task }
    }

    /// Next payload from the topic; `None` when the feed has closed
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Shared messaging substrate enabling cross-process delivery within a room
#[async_trait]
pub trait PubSubLayer: Send + Sync {
    /// Publish a payload to the room's topic, reaching every subscribed
    /// process including this one
    async fn publish(&self, room: &str, payload: &[u8]) -> Result<(), PubSubError>;

    /// Establish a subscription to the room's topic
    async fn subscribe(&self, room: &str) -> Result<Subscription, PubSubError>;
}

fn room_channel(room: &str) -> String {
    format!("roomcast:room:{room}")
}

// =============================================================================
// Redis backend
// =============================================================================

/// Redis-backed pub/sub layer.
///
/// Publishes go through a shared [`ConnectionManager`] (which reconnects on
/// failure); each room subscription holds its own dedicated pub/sub
/// connection, owned by the task that pumps its messages.
pub struct RedisPubSubLayer {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisPubSubLayer {
    pub fn new(client: redis::Client, publisher: ConnectionManager) -> Self {
        Self { client, publisher }
    }
}

#[async_trait]
impl PubSubLayer for RedisPubSubLayer {
    async fn publish(&self, room: &str, payload: &[u8]) -> Result<(), PubSubError> {
        let mut conn = self.publisher.clone();
        let _receivers: i64 = conn
            .publish(room_channel(room), payload)
            .await
            .map_err(|e| PubSubError::BrokerUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, room: &str) -> Result<Subscription, PubSubError> {
        let channel = room_channel(room);

        // Establish the connection and the SUBSCRIBE before returning, so a
        // dead broker surfaces here instead of inside the pump task
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| PubSubError::BrokerUnavailable(e.to_string()))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| PubSubError::BrokerUnavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Undecodable pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).is_err() {
                    break; // Subscription dropped
                }
            }
            tracing::debug!(channel = %channel, "Redis pub/sub feed closed");
        });

        Ok(Subscription::new(rx, task))
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// In-process pub/sub for single-node deployments.
///
/// One broadcast channel per topic; topics are created lazily on first use.
pub struct MemoryPubSubLayer {
    topics: Mutex<HashMap<String, broadcast::Sender<Arc<Vec<u8>>>>>,
}

impl MemoryPubSubLayer {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    async fn topic(&self, channel: &str) -> broadcast::Sender<Arc<Vec<u8>>> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(MEMORY_TOPIC_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryPubSubLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubLayer for MemoryPubSubLayer {
    async fn publish(&self, room: &str, payload: &[u8]) -> Result<(), PubSubError> {
        let topic = self.topic(&room_channel(room)).await;
        // send() returns Err when there are no subscribers — that's fine
        let _ = topic.send(Arc::new(payload.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, room: &str) -> Result<Subscription, PubSubError> {
        let channel = room_channel(room);
        let mut topic_rx = self.topic(&channel).await.subscribe();

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                match topic_rx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload.as_ref().clone()).is_err() {
                            break; // Subscription dropped
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %channel, skipped, "Subscriber lagged, messages skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_memory_publish_reaches_subscriber() {
        let layer = MemoryPubSubLayer::new();
        let mut sub = layer.subscribe("general").await.unwrap();

        layer.publish("general", b"one").await.unwrap();
        layer.publish("general", b"two").await.unwrap();

        let first = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some(&b"one"[..]));
        let second = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert_eq!(second.as_deref(), Some(&b"two"[..]));
    }

    #[tokio::test]
    async fn test_memory_topics_are_isolated() {
        let layer = MemoryPubSubLayer::new();
        let mut general = layer.subscribe("general").await.unwrap();
        let mut random = layer.subscribe("random").await.unwrap();

        layer.publish("general", b"hello").await.unwrap();

        let received = timeout(Duration::from_secs(1), general.recv()).await.unwrap();
        assert_eq!(received.as_deref(), Some(&b"hello"[..]));
        // Nothing on the other topic
        assert!(timeout(Duration::from_millis(50), random.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let layer = MemoryPubSubLayer::new();
        layer.publish("empty", b"dropped").await.unwrap();
    }
}

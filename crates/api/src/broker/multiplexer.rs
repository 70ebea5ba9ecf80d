//! Room multiplexer
//!
//! Bridges the shared pub/sub layer and local connections. One subscription
//! per room per process; each subscription runs a delivery task that fans
//! broker-delivered messages out to every local connection in the room.
//! Messages a connection sends come back through the same fan-out path as
//! everyone else's — no local short-circuit — so the whole deployment sees a
//! single delivery order per room.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use roomcast_shared::StoredMessage;

use super::events::ServerFrame;
use super::pubsub::{PubSubError, PubSubLayer, Subscription};
use super::registry::{ConnectionRegistry, SubscriptionSignal};

/// Maximum number of retry attempts for pub/sub operations
const MAX_RETRIES: usize = 3;

/// Initial backoff duration for retries (100ms)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Maximum backoff duration for retries (2 seconds)
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// A live per-room subscription: the delivery task owns the pub/sub feed
struct RoomSubscription {
    delivery_task: JoinHandle<()>,
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.delivery_task.abort();
    }
}

/// Bridges the shared pub/sub layer and this process's connections
pub struct RoomMultiplexer {
    layer: Arc<dyn PubSubLayer>,
    registry: Arc<ConnectionRegistry>,
    subscriptions: RwLock<HashMap<String, RoomSubscription>>,
    /// Handed to delivery tasks so a fan-out that empties a room can drop
    /// its own subscription without keeping the multiplexer alive
    self_handle: Weak<RoomMultiplexer>,
}

impl RoomMultiplexer {
    pub fn new(layer: Arc<dyn PubSubLayer>, registry: Arc<ConnectionRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|self_handle| Self {
            layer,
            registry,
            subscriptions: RwLock::new(HashMap::new()),
            self_handle: self_handle.clone(),
        })
    }

    /// Establish the shared-layer subscription for a room. Idempotent: at
    /// most one subscription per room per process. Transient broker failures
    /// are retried with capped exponential backoff before surfacing
    /// `BrokerUnavailable`.
    pub async fn subscribe(&self, room: &str) -> Result<(), PubSubError> {
        {
            let subscriptions = self.subscriptions.read().await;
            if subscriptions.contains_key(room) {
                return Ok(());
            }
        }

        let feed = retry(|| self.layer.subscribe(room)).await?;

        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(room) {
            // Raced with another connect; the fresh feed tears down on drop
            return Ok(());
        }
        let delivery_task = self.spawn_delivery(room.to_string(), feed);
        subscriptions.insert(room.to_string(), RoomSubscription { delivery_task });

        tracing::info!(room = %room, "Subscribed to room topic");
        Ok(())
    }

    /// Tear down the room's shared-layer subscription. Idempotent
    pub async fn unsubscribe(&self, room: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.remove(room).is_some() {
            tracing::info!(room = %room, "Unsubscribed from room topic");
        }
    }

    /// Whether this process currently holds a subscription for the room
    pub async fn is_subscribed(&self, room: &str) -> bool {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.contains_key(room)
    }

    /// Forward a stored message to the shared layer so all subscribed
    /// processes (this one included) receive it via the same fan-out path.
    /// Retried with capped exponential backoff; on exhaustion the message
    /// stays persisted and is recoverable via history.
    pub async fn publish(&self, message: &StoredMessage) -> Result<(), PubSubError> {
        let payload = serde_json::to_vec(message)?;
        retry(|| self.layer.publish(&message.room_name, &payload)).await
    }

    /// Pump broker-delivered payloads for one room into its local
    /// connections, in arrival order
    fn spawn_delivery(&self, room: String, mut feed: Subscription) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let multiplexer = self.self_handle.clone();
        tokio::spawn(async move {
            while let Some(payload) = feed.recv().await {
                let message: StoredMessage = match serde_json::from_slice(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(room = %room, error = %e, "Discarding undecodable broker message");
                        continue;
                    }
                };

                let room_emptied = deliver_local(&registry, &room, message).await;
                if room_emptied {
                    // Every local connection is gone; drop the subscription
                    if let Some(multiplexer) = multiplexer.upgrade() {
                        multiplexer.unsubscribe(&room).await;
                    }
                    break;
                }
            }
        })
    }
}

/// Write a message to every local connection in the room.
///
/// A write failure unregisters that one connection but never aborts delivery
/// to the rest. Returns true when a failed write removed the room's last
/// local connection.
async fn deliver_local(
    registry: &Arc<ConnectionRegistry>,
    room: &str,
    message: StoredMessage,
) -> bool {
    let connections = registry.list_local(room).await;
    let message_id = message.id;
    let frame = ServerFrame::from(message);

    let mut delivered = 0;
    let mut failed = Vec::new();
    for conn in &connections {
        match conn.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => {
                tracing::warn!(
                    connection_id = %conn.connection_id,
                    room = %room,
                    "Failed to write to connection (likely closed), unregistering"
                );
                failed.push(conn.connection_id);
            }
        }
    }

    tracing::debug!(
        room = %room,
        message_id,
        recipients = delivered,
        failed = failed.len(),
        "Delivered broker message to room"
    );

    let mut room_emptied = false;
    for connection_id in failed {
        if registry.unregister(&connection_id).await == Some(SubscriptionSignal::Unsubscribe) {
            room_emptied = true;
        }
    }
    room_emptied
}

/// Run a pub/sub operation with capped exponential backoff and jitter
async fn retry<T, F, Fut>(operation: F) -> Result<T, PubSubError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PubSubError>>,
{
    use tokio_retry::strategy::{jitter, ExponentialBackoff};
    use tokio_retry::Retry;

    let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
        .max_delay(RETRY_MAX_DELAY)
        .take(MAX_RETRIES)
        .map(jitter);

    Retry::spawn(retry_strategy, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::connection::Connection;
    use crate::broker::pubsub::MemoryPubSubLayer;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn make_message(room: &str, id: i64, body: &str) -> StoredMessage {
        StoredMessage {
            room_name: room.to_string(),
            id,
            sender_id: Uuid::new_v4(),
            body: body.to_string(),
            created_at: time::OffsetDateTime::now_utc(),
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, Arc<RoomMultiplexer>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let multiplexer =
            RoomMultiplexer::new(Arc::new(MemoryPubSubLayer::new()), Arc::clone(&registry));
        (registry, multiplexer)
    }

    async fn join(
        registry: &Arc<ConnectionRegistry>,
        room: &str,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn, _) = registry
            .register(Connection::new(Uuid::new_v4(), room.to_string(), tx))
            .await
            .unwrap();
        (conn, rx)
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (_registry, multiplexer) = setup();

        multiplexer.subscribe("general").await.unwrap();
        multiplexer.subscribe("general").await.unwrap();
        assert!(multiplexer.is_subscribed("general").await);

        multiplexer.unsubscribe("general").await;
        assert!(!multiplexer.is_subscribed("general").await);
        // Second unsubscribe is a no-op
        multiplexer.unsubscribe("general").await;
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let (registry, multiplexer) = setup();
        let (_conn, mut rx) = join(&registry, "general").await;
        multiplexer.subscribe("general").await.unwrap();

        for i in 1..=3 {
            multiplexer
                .publish(&make_message("general", i, &format!("msg {i}")))
                .await
                .unwrap();
        }

        for i in 1..=3 {
            let frame = timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match frame {
                ServerFrame::Broadcast { id, message, .. } => {
                    assert_eq!(id, i);
                    assert_eq!(message, format!("msg {i}"));
                }
                other => panic!("Expected Broadcast, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_write_failure_is_isolated() {
        let (registry, multiplexer) = setup();
        let (_alive, mut alive_rx) = join(&registry, "general").await;
        let (dead, dead_rx) = join(&registry, "general").await;
        drop(dead_rx); // Writes to this connection now fail
        multiplexer.subscribe("general").await.unwrap();

        multiplexer
            .publish(&make_message("general", 1, "hi"))
            .await
            .unwrap();

        // The healthy connection still gets the message
        let frame = timeout(Duration::from_secs(1), alive_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, ServerFrame::Broadcast { id: 1, .. }));

        // The dead one was unregistered
        timeout(Duration::from_secs(1), async {
            while registry.connection_count().await != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(registry.unregister(&dead.connection_id).await, None);
    }

    #[tokio::test]
    async fn test_last_write_failure_drops_subscription() {
        let (registry, multiplexer) = setup();
        let (_conn, rx) = join(&registry, "general").await;
        drop(rx);
        multiplexer.subscribe("general").await.unwrap();

        multiplexer
            .publish(&make_message("general", 1, "hi"))
            .await
            .unwrap();

        timeout(Duration::from_secs(1), async {
            while multiplexer.is_subscribed("general").await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(registry.room_size("general").await, 0);
    }
}

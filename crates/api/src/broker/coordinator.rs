//! Delivery coordinator
//!
//! Drives one connection's lifecycle as an explicit state machine
//! (`Connecting -> Open -> Closing -> Closed`) and orchestrates the send
//! path: validate, persist, then publish. The only component that talks to
//! both the message store and the room multiplexer.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::connection::Connection;
use super::events::{ClientFrame, SendErrorCode, ServerFrame};
use super::multiplexer::RoomMultiplexer;
use super::pubsub::PubSubError;
use super::registry::{ConnectionRegistry, RegistryError, SubscriptionSignal};
use super::store::MessageStore;
use crate::auth::Authenticator;

/// Lifecycle of one connection. Terminal state is `Closed`; no operations
/// are valid afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a connection attempt was refused before reaching `Open`
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("authentication required")]
    Unauthorized,
    #[error("authentication collaborator unavailable: {0}")]
    AuthUnavailable(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    PubSub(#[from] PubSubError),
}

/// One client's seat in a room: the registered connection plus its
/// lifecycle phase. Owned by the socket task driving it.
pub struct ChatSession {
    conn: Arc<Connection>,
    phase: ConnectionPhase,
}

impl ChatSession {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }
}

/// Orchestrates connect, message delivery, and disconnect
pub struct DeliveryCoordinator {
    registry: Arc<ConnectionRegistry>,
    multiplexer: Arc<RoomMultiplexer>,
    store: Arc<dyn MessageStore>,
    authenticator: Arc<dyn Authenticator>,
}

impl DeliveryCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        multiplexer: Arc<RoomMultiplexer>,
        store: Arc<dyn MessageStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            registry,
            multiplexer,
            store,
            authenticator,
        }
    }

    /// The `Connecting` phase's auth check: resolve a session token to a
    /// user id, refusing the connection otherwise
    pub async fn authenticate(&self, token: &str) -> Result<Uuid, ConnectError> {
        match self.authenticator.authenticate(token).await {
            Ok(Some(user_id)) => Ok(user_id),
            Ok(None) => Err(ConnectError::Unauthorized),
            Err(e) => {
                tracing::error!(error = %e, "Authentication collaborator unreachable");
                Err(ConnectError::AuthUnavailable(e.to_string()))
            }
        }
    }

    /// Complete the handshake: register the connection and, when it is the
    /// room's first, subscribe the process to the room's topic. On success
    /// the session transitions to `Open`.
    pub async fn open(
        &self,
        user_id: Uuid,
        room: &str,
        sender: mpsc::UnboundedSender<ServerFrame>,
    ) -> Result<ChatSession, ConnectError> {
        let conn = Connection::new(user_id, room.to_string(), sender);
        let (conn, signal) = self.registry.register(conn).await?;

        if signal == Some(SubscriptionSignal::Subscribe) {
            if let Err(e) = self.multiplexer.subscribe(room).await {
                // Never leave a registered connection without a live
                // subscription: roll back and refuse the connection
                self.registry.unregister(&conn.connection_id).await;
                return Err(e.into());
            }
        }

        Ok(ChatSession {
            conn,
            phase: ConnectionPhase::Open,
        })
    }

    /// Handle one inbound client frame while the session is `Open`:
    /// validate, append to the store, then publish. Failures are
    /// acknowledged to the sender only and never close the connection.
    pub async fn handle_frame(&self, session: &ChatSession, text: &str) {
        if session.phase != ConnectionPhase::Open {
            tracing::warn!(
                connection_id = %session.conn.connection_id,
                phase = ?session.phase,
                "Dropping frame received outside Open phase"
            );
            return;
        }
        let conn = &session.conn;

        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    connection_id = %conn.connection_id,
                    error = %e,
                    "Failed to parse client frame"
                );
                let _ = conn.send(ServerFrame::rejected(
                    SendErrorCode::InvalidMessage,
                    "invalid frame format",
                ));
                return;
            }
        };

        let body = frame.message.trim();
        if body.is_empty() {
            let _ = conn.send(ServerFrame::rejected(
                SendErrorCode::InvalidMessage,
                "message body must not be empty",
            ));
            return;
        }

        // Persist before publish: no message is ever delivered that was not
        // durably recorded
        let stored = match self.store.append(&conn.room, conn.user_id, body).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(
                    connection_id = %conn.connection_id,
                    room = %conn.room,
                    error = %e,
                    "Append failed, message not published"
                );
                let _ = conn.send(ServerFrame::rejected(
                    SendErrorCode::StoreUnavailable,
                    "message was not stored",
                ));
                return;
            }
        };

        if let Err(e) = self.multiplexer.publish(&stored).await {
            // The message is persisted and will surface through history;
            // only live delivery failed
            tracing::error!(
                room = %conn.room,
                message_id = stored.id,
                error = %e,
                "Publish failed after retries; message persisted but not delivered live"
            );
            let _ = conn.send(ServerFrame::rejected(
                SendErrorCode::BrokerUnavailable,
                "message stored but not delivered",
            ));
        }
    }

    /// Close the session: unregister (idempotent) and, when the room's last
    /// local connection leaves, drop the room subscription. Safe to call
    /// more than once; the session ends `Closed`.
    pub async fn disconnect(&self, session: &mut ChatSession) {
        if session.phase == ConnectionPhase::Closed {
            return;
        }
        session.phase = ConnectionPhase::Closing;

        if self.registry.unregister(&session.conn.connection_id).await
            == Some(SubscriptionSignal::Unsubscribe)
        {
            self.multiplexer.unsubscribe(&session.conn.room).await;
        }

        session.phase = ConnectionPhase::Closed;
    }
}

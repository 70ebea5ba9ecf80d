//! Connection registry
//!
//! Tracks which connections exist per room within this process, with
//! per-room reference counts driving pub/sub subscription lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;

/// Raised when a connection id is registered twice. Programming-error class:
/// should not occur under correct registry usage.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} already registered")]
    DuplicateConnection(Uuid),
}

/// Emitted on a room's local-count edge transitions. The delivery
/// coordinator forwards these to the room multiplexer; the registry itself
/// never touches the pub/sub layer, so its lock is only ever held for
/// in-memory map mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionSignal {
    /// The room's local connection count went 0 → 1
    Subscribe,
    /// The room's local connection count went 1 → 0
    Unsubscribe,
}

#[derive(Default)]
struct RegistryInner {
    /// All active connections indexed by connection_id
    connections: HashMap<Uuid, Arc<Connection>>,
    /// Connections grouped by room; a room entry exists iff it is non-empty
    rooms: HashMap<String, Vec<Arc<Connection>>>,
}

/// Per-process registry of live connections grouped by room
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Add a connection under its room.
    ///
    /// Returns the registered handle and `Some(Subscribe)` when this was the
    /// room's first local connection.
    pub async fn register(
        &self,
        conn: Connection,
    ) -> Result<(Arc<Connection>, Option<SubscriptionSignal>), RegistryError> {
        let conn = Arc::new(conn);
        let mut inner = self.inner.write().await;

        if inner.connections.contains_key(&conn.connection_id) {
            tracing::error!(
                connection_id = %conn.connection_id,
                room = %conn.room,
                "Duplicate connection registration rejected"
            );
            return Err(RegistryError::DuplicateConnection(conn.connection_id));
        }

        inner
            .connections
            .insert(conn.connection_id, Arc::clone(&conn));
        let members = inner.rooms.entry(conn.room.clone()).or_default();
        members.push(Arc::clone(&conn));
        let room_size = members.len();

        tracing::info!(
            connection_id = %conn.connection_id,
            user_id = %conn.user_id,
            room = %conn.room,
            room_size,
            "Connection registered"
        );

        let signal = (room_size == 1).then_some(SubscriptionSignal::Subscribe);
        Ok((conn, signal))
    }

    /// Remove a connection. Idempotent: a no-op (returning `None`) when the
    /// connection is absent, supporting repeated cleanup on error paths.
    ///
    /// Returns `Some(Unsubscribe)` when this was the room's last local
    /// connection.
    pub async fn unregister(&self, connection_id: &Uuid) -> Option<SubscriptionSignal> {
        let mut inner = self.inner.write().await;

        let conn = inner.connections.remove(connection_id)?;
        let mut last = false;
        if let Some(members) = inner.rooms.get_mut(&conn.room) {
            members.retain(|c| c.connection_id != *connection_id);
            if members.is_empty() {
                inner.rooms.remove(&conn.room);
                last = true;
            }
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %conn.user_id,
            room = %conn.room,
            last_in_room = last,
            "Connection unregistered"
        );

        last.then_some(SubscriptionSignal::Unsubscribe)
    }

    /// Snapshot of the room's local connections for delivery
    pub async fn list_local(&self, room: &str) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner.rooms.get(room).cloned().unwrap_or_default()
    }

    /// Number of local connections in a room
    pub async fn room_size(&self, room: &str) -> usize {
        let inner = self.inner.read().await;
        inner.rooms.get(room).map(|v| v.len()).unwrap_or(0)
    }

    /// Total number of active connections in this process
    pub async fn connection_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

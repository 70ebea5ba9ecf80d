//! WebSocket connection handle
//!
//! Represents an active WebSocket connection bound to one room for its
//! entire lifetime.

use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerFrame;

/// An active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique id for this connection within the process
    pub connection_id: Uuid,

    /// Authenticated user id
    pub user_id: Uuid,

    /// The room this connection joined; never changes mid-session
    pub room: String,

    /// When the connection completed its handshake
    pub connected_at: OffsetDateTime,

    /// Channel to the writer task feeding this connection's socket
    sender: mpsc::UnboundedSender<ServerFrame>,
}

impl Connection {
    pub fn new(user_id: Uuid, room: String, sender: mpsc::UnboundedSender<ServerFrame>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            user_id,
            room,
            connected_at: OffsetDateTime::now_utc(),
            sender,
        }
    }

    /// Send a frame to this connection
    ///
    /// Returns Err if the connection's writer task has gone away
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed frame
    pub fn send(&self, frame: ServerFrame) -> Result<(), mpsc::error::SendError<ServerFrame>> {
        self.sender.send(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::events::SendErrorCode;

    #[test]
    fn test_send_reaches_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(Uuid::new_v4(), "general".to_string(), tx);

        conn.send(ServerFrame::rejected(SendErrorCode::InvalidMessage, "empty body"))
            .unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_send_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(Uuid::new_v4(), "general".to_string(), tx);
        drop(rx);

        assert!(conn
            .send(ServerFrame::rejected(SendErrorCode::InvalidMessage, "x"))
            .is_err());
    }
}

//! WebSocket wire frames
//!
//! Defines the client-to-server and server-to-client frame types with serde
//! serialization matching the wire protocol.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use roomcast_shared::StoredMessage;

/// Frame sent from client to server: `{"message": <text>}`
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub message: String,
}

/// Reason a send was rejected, carried in the negative acknowledgment frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorCode {
    /// Malformed frame or empty body; the connection stays open
    InvalidMessage,
    /// The message store rejected the append; nothing was published
    StoreUnavailable,
    /// Persisted but not delivered live; recoverable via history
    BrokerUnavailable,
}

/// Frames sent from server to client.
///
/// `Broadcast` is the fan-out frame every subscriber of a room receives;
/// `Rejected` is the negative acknowledgment sent only to a sender whose
/// message could not be processed, so clients can distinguish "not sent"
/// from silent network loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Broadcast {
        message: String,
        #[serde(rename = "senderId")]
        sender_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        id: i64,
    },
    Rejected {
        error: SendErrorCode,
        detail: String,
    },
}

impl From<StoredMessage> for ServerFrame {
    fn from(message: StoredMessage) -> Self {
        ServerFrame::Broadcast {
            message: message.body,
            sender_id: message.sender_id,
            timestamp: message.created_at,
            id: message.id,
        }
    }
}

impl ServerFrame {
    /// Negative acknowledgment for a failed send
    pub fn rejected(error: SendErrorCode, detail: impl Into<String>) -> Self {
        ServerFrame::Rejected {
            error,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::format_description::well_known::Rfc3339;

    #[test]
    fn test_client_frame_deserialization() {
        let frame: ClientFrame = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(frame.message, "hi");
    }

    #[test]
    fn test_broadcast_frame_serialization() {
        let sender_id = Uuid::new_v4();
        let timestamp = OffsetDateTime::parse("2026-08-01T12:00:00Z", &Rfc3339).unwrap();
        let frame = ServerFrame::Broadcast {
            message: "hi".to_string(),
            sender_id,
            timestamp,
            id: 42,
        };

        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["message"], "hi");
        assert_eq!(json["senderId"], sender_id.to_string());
        assert_eq!(json["timestamp"], "2026-08-01T12:00:00Z");
        assert_eq!(json["id"], 42);
    }

    #[test]
    fn test_rejected_frame_serialization() {
        let frame = ServerFrame::rejected(SendErrorCode::StoreUnavailable, "append failed");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("store_unavailable"));
        assert!(json.contains("append failed"));
    }

    #[test]
    fn test_broadcast_from_stored_message() {
        let message = StoredMessage {
            room_name: "general".to_string(),
            id: 3,
            sender_id: Uuid::new_v4(),
            body: "hello".to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        match ServerFrame::from(message.clone()) {
            ServerFrame::Broadcast { message: body, sender_id, id, .. } => {
                assert_eq!(body, message.body);
                assert_eq!(sender_id, message.sender_id);
                assert_eq!(id, message.id);
            }
            other => panic!("Expected Broadcast frame, got {:?}", other),
        }
    }
}

//! Core data types for the room-based message broker

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum accepted length for a room name
pub const MAX_ROOM_NAME_LEN: usize = 128;

/// Validate a room name: non-empty, bounded, URL- and Redis-channel-safe
pub fn is_valid_room_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_ROOM_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// A chat message as persisted by the message store.
///
/// Immutable once written. `id` is assigned by the store and is unique and
/// strictly increasing within a room, which makes it the authoritative
/// delivery order across all processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StoredMessage {
    pub room_name: String,
    pub id: i64,
    pub sender_id: Uuid,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A registered user as exposed by the user directory
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSummary {
    pub id: Uuid,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_room_names() {
        assert!(is_valid_room_name("general"));
        assert!(is_valid_room_name("room-42"));
        assert!(is_valid_room_name("team_chat.dev"));
    }

    #[test]
    fn test_invalid_room_names() {
        assert!(!is_valid_room_name(""));
        assert!(!is_valid_room_name("has space"));
        assert!(!is_valid_room_name("slash/room"));
        assert!(!is_valid_room_name(&"x".repeat(MAX_ROOM_NAME_LEN + 1)));
    }

    #[test]
    fn test_stored_message_round_trip() {
        let message = StoredMessage {
            room_name: "general".to_string(),
            id: 7,
            sender_id: Uuid::new_v4(),
            body: "hi".to_string(),
            created_at: OffsetDateTime::now_utc(),
        };

        let json = serde_json::to_string(&message).unwrap();
        let back: StoredMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, message.id);
        assert_eq!(back.body, message.body);
        assert_eq!(back.sender_id, message.sender_id);
    }
}

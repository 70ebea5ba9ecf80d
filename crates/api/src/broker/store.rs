//! Message store
//!
//! Durable, ordered persistence of chat messages. Ids are assigned by the
//! store, unique and strictly increasing within a room; they are the
//! authoritative delivery order across all processes, so persistence always
//! precedes publish on the send path.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use roomcast_shared::StoredMessage;

/// Attempts to win the per-room id race before giving up
const APPEND_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// Durable, ordered persistence of messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Assign an id and timestamp, persist, and return the stored record
    async fn append(
        &self,
        room: &str,
        sender_id: Uuid,
        body: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Up to `limit` messages with `id < before_id` (or the latest `limit`
    /// when `before_id` is absent), newest-first for pagination
    async fn history(
        &self,
        room: &str,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Postgres-backed message store
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(
        &self,
        room: &str,
        sender_id: Uuid,
        body: &str,
    ) -> Result<StoredMessage, StoreError> {
        // The next per-room id is computed inside the INSERT; two writers
        // racing for the same id collide on the (room_name, id) primary key
        // and the loser retries. Rows are append-only, so the retried MAX is
        // always fresh.
        for attempt in 1..=APPEND_MAX_ATTEMPTS {
            let result = sqlx::query_as::<_, StoredMessage>(
                r#"
                INSERT INTO messages (room_name, id, sender_id, body)
                VALUES (
                    $1,
                    (SELECT COALESCE(MAX(id), 0) + 1 FROM messages WHERE room_name = $1),
                    $2,
                    $3
                )
                RETURNING room_name, id, sender_id, body, created_at
                "#,
            )
            .bind(room)
            .bind(sender_id)
            .bind(body)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(message) => return Ok(message),
                Err(sqlx::Error::Database(db_err))
                    if db_err.code().as_deref() == Some("23505")
                        && attempt < APPEND_MAX_ATTEMPTS =>
                {
                    tracing::debug!(room = %room, attempt, "Append id collision, retrying");
                }
                Err(e) => {
                    tracing::error!(room = %room, error = %e, "Append failed");
                    return Err(StoreError::Unavailable(e.to_string()));
                }
            }
        }
        Err(StoreError::Unavailable(format!(
            "gave up appending to room {room} after {APPEND_MAX_ATTEMPTS} id collisions"
        )))
    }

    async fn history(
        &self,
        room: &str,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT room_name, id, sender_id, body, created_at
            FROM messages
            WHERE room_name = $1
              AND ($2::bigint IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(room)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(room = %room, error = %e, "History query failed");
            StoreError::Unavailable(e.to_string())
        })
    }
}

/// In-memory store used by unit tests. Flip `fail` to simulate an
/// unavailable backend.
#[cfg(test)]
pub struct MemoryMessageStore {
    rooms: tokio::sync::Mutex<std::collections::HashMap<String, Vec<StoredMessage>>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            rooms: tokio::sync::Mutex::new(std::collections::HashMap::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(
        &self,
        room: &str,
        sender_id: Uuid,
        body: &str,
    ) -> Result<StoredMessage, StoreError> {
        self.check_available()?;
        let mut rooms = self.rooms.lock().await;
        let messages = rooms.entry(room.to_string()).or_default();
        let id = messages.last().map(|m| m.id).unwrap_or(0) + 1;
        let message = StoredMessage {
            room_name: room.to_string(),
            id,
            sender_id,
            body: body.to_string(),
            created_at: time::OffsetDateTime::now_utc(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn history(
        &self,
        room: &str,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.check_available()?;
        let rooms = self.rooms.lock().await;
        let mut page: Vec<StoredMessage> = rooms
            .get(room)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| before_id.map_or(true, |before| m.id < before))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        page.sort_by(|a, b| b.id.cmp(&a.id));
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryMessageStore::new();
        let alice = Uuid::new_v4();

        let mut last_id = 0;
        for body in ["one", "two", "three"] {
            let message = store.append("general", alice, body).await.unwrap();
            assert!(message.id > last_id);
            last_id = message.id;
        }
    }

    #[tokio::test]
    async fn test_ids_are_scoped_per_room() {
        let store = MemoryMessageStore::new();
        let alice = Uuid::new_v4();

        store.append("general", alice, "a").await.unwrap();
        store.append("general", alice, "b").await.unwrap();
        let other = store.append("random", alice, "c").await.unwrap();
        assert_eq!(other.id, 1);
    }

    #[tokio::test]
    async fn test_append_history_round_trip() {
        let store = MemoryMessageStore::new();
        let alice = Uuid::new_v4();

        let appended = store.append("general", alice, "hi").await.unwrap();
        let page = store.history("general", None, 1).await.unwrap();

        assert_eq!(page.len(), 1);
        assert_eq!(page[0].body, "hi");
        assert_eq!(page[0].sender_id, alice);
        assert_eq!(page[0].id, appended.id);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_paginates() {
        let store = MemoryMessageStore::new();
        let alice = Uuid::new_v4();
        for i in 1..=5 {
            store
                .append("general", alice, &format!("msg {i}"))
                .await
                .unwrap();
        }

        let page = store.history("general", None, 2).await.unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![5, 4]);

        // Resume before the oldest id of the previous page
        let page = store.history("general", Some(4), 2).await.unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3, 2]);

        let page = store.history("general", Some(2), 2).await.unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_append() {
        let store = MemoryMessageStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.append("general", Uuid::new_v4(), "hi").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_pg_append_round_trip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = roomcast_shared::db::create_pool(&url, 3)
            .await
            .expect("Failed to create pool");
        let store = PgMessageStore::new(pool);

        let sender = Uuid::new_v4();
        let appended = store.append("store-test", sender, "hi").await.unwrap();
        let page = store.history("store-test", None, 1).await.unwrap();
        assert_eq!(page[0].id, appended.id);
        assert_eq!(page[0].body, "hi");
    }
}

use std::sync::Arc;

use courier_core::{MessageContent, UserId};
use sqlx::{postgres::PgRow, PgPool, Row};
use tokio::sync::{OnceCell, RwLock};

use super::{db::ensure_schema, errors::StoreError};

/// Serializes appends so ids and clamped timestamps are assigned in one order.
const APPEND_LOCK_ID: i64 = 0x434f_5552_4945_5201;

/// A message accepted from a session, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewMessage {
    pub(crate) sender_id: UserId,
    pub(crate) receiver_id: UserId,
    pub(crate) content: MessageContent,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredMessage {
    pub(crate) id: i64,
    pub(crate) sender_id: UserId,
    pub(crate) receiver_id: UserId,
    pub(crate) content: String,
    pub(crate) created_at_unix: i64,
}

impl StoredMessage {
    fn between(&self, user_a: UserId, user_b: UserId) -> bool {
        (self.sender_id == user_a && self.receiver_id == user_b)
            || (self.sender_id == user_b && self.receiver_id == user_a)
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    messages: Vec<StoredMessage>,
    last_id: i64,
    last_created_at_unix: i64,
}

#[derive(Clone)]
enum StoreBackend {
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
    Memory(Arc<RwLock<MemoryLog>>),
}

/// Durable append-only log of direct messages.
///
/// Backed by Postgres when a database is configured, otherwise by an
/// in-process log with the same ordering guarantees.
#[derive(Clone)]
pub(crate) struct MessageStore {
    backend: StoreBackend,
}

impl MessageStore {
    pub(crate) fn postgres(pool: PgPool) -> Self {
        Self {
            backend: StoreBackend::Postgres {
                pool,
                schema_ready: Arc::new(OnceCell::new()),
            },
        }
    }

    pub(crate) fn in_memory() -> Self {
        Self {
            backend: StoreBackend::Memory(Arc::new(RwLock::new(MemoryLog::default()))),
        }
    }

    /// Persist one message and return it with its assigned id.
    ///
    /// The stored timestamp is never earlier than any previously stored one,
    /// so id order and time order agree.
    pub(crate) async fn append(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        match &self.backend {
            StoreBackend::Postgres { pool, schema_ready } => {
                schema_ready
                    .get_or_try_init(|| ensure_schema(pool))
                    .await?;
                let mut tx = pool.begin().await?;
                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(APPEND_LOCK_ID)
                    .execute(&mut *tx)
                    .await?;
                let row = sqlx::query(
                    "INSERT INTO messages (sender_id, receiver_id, content, created_at_unix)
                     SELECT $1, $2, $3, GREATEST($4, COALESCE(MAX(created_at_unix), $4))
                     FROM messages
                     RETURNING message_id, created_at_unix",
                )
                .bind(message.sender_id.get())
                .bind(message.receiver_id.get())
                .bind(message.content.as_str())
                .bind(message.created_at_unix)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(StoredMessage {
                    id: row.try_get("message_id")?,
                    sender_id: message.sender_id,
                    receiver_id: message.receiver_id,
                    content: message.content.into_inner(),
                    created_at_unix: row.try_get("created_at_unix")?,
                })
            }
            StoreBackend::Memory(log) => {
                let mut log = log.write().await;
                log.last_id += 1;
                log.last_created_at_unix = log.last_created_at_unix.max(message.created_at_unix);
                let stored = StoredMessage {
                    id: log.last_id,
                    sender_id: message.sender_id,
                    receiver_id: message.receiver_id,
                    content: message.content.into_inner(),
                    created_at_unix: log.last_created_at_unix,
                };
                log.messages.push(stored.clone());
                Ok(stored)
            }
        }
    }

    /// Messages exchanged between two users in either direction, newest
    /// (highest id) first.
    ///
    /// An `offset` past the end of the conversation yields an empty page.
    pub(crate) async fn paginated_history(
        &self,
        user_a: UserId,
        user_b: UserId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        match &self.backend {
            StoreBackend::Postgres { pool, schema_ready } => {
                schema_ready
                    .get_or_try_init(|| ensure_schema(pool))
                    .await?;
                let offset = i64::try_from(offset).map_err(|_| StoreError::InvalidWindow)?;
                let limit = i64::try_from(limit).map_err(|_| StoreError::InvalidWindow)?;
                let rows = sqlx::query(
                    "SELECT message_id, sender_id, receiver_id, content, created_at_unix
                     FROM messages
                     WHERE (sender_id = $1 AND receiver_id = $2)
                        OR (sender_id = $2 AND receiver_id = $1)
                     ORDER BY message_id DESC
                     LIMIT $3 OFFSET $4",
                )
                .bind(user_a.get())
                .bind(user_b.get())
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?;

                rows.iter().map(stored_message_from_row).collect()
            }
            StoreBackend::Memory(log) => {
                let log = log.read().await;
                Ok(log
                    .messages
                    .iter()
                    .rev()
                    .filter(|message| message.between(user_a, user_b))
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect())
            }
        }
    }
}

fn stored_message_from_row(row: &PgRow) -> Result<StoredMessage, StoreError> {
    let sender_id: i64 = row.try_get("sender_id")?;
    let receiver_id: i64 = row.try_get("receiver_id")?;
    Ok(StoredMessage {
        id: row.try_get("message_id")?,
        sender_id: UserId::try_from(sender_id).map_err(|_| StoreError::InvalidRow("sender_id"))?,
        receiver_id: UserId::try_from(receiver_id)
            .map_err(|_| StoreError::InvalidRow("receiver_id"))?,
        content: row.try_get("content")?,
        created_at_unix: row.try_get("created_at_unix")?,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_core::{MessageContent, UserId};
    use sqlx::postgres::PgPoolOptions;

    use super::{MessageStore, NewMessage};

    fn user(id: i64) -> UserId {
        UserId::try_from(id).unwrap()
    }

    fn message(sender: i64, receiver: i64, content: &str, created_at_unix: i64) -> NewMessage {
        NewMessage {
            sender_id: user(sender),
            receiver_id: user(receiver),
            content: MessageContent::try_from(content.to_owned()).unwrap(),
            created_at_unix,
        }
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let store = MessageStore::in_memory();
        let first = store.append(message(1, 2, "a", 100)).await.unwrap();
        let second = store.append(message(3, 4, "b", 100)).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(second.content, "b");
    }

    #[tokio::test]
    async fn history_is_newest_first_in_both_directions() {
        let store = MessageStore::in_memory();
        store.append(message(1, 2, "a to b", 100)).await.unwrap();
        store.append(message(2, 1, "b to a", 101)).await.unwrap();
        store.append(message(1, 3, "elsewhere", 102)).await.unwrap();

        let history = store
            .paginated_history(user(1), user(2), 0, 10)
            .await
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b to a", "a to b"]);

        let mirrored = store
            .paginated_history(user(2), user(1), 0, 10)
            .await
            .unwrap();
        assert_eq!(history, mirrored);
    }

    #[tokio::test]
    async fn same_second_messages_order_by_id() {
        let store = MessageStore::in_memory();
        store.append(message(1, 2, "first", 500)).await.unwrap();
        store.append(message(1, 2, "second", 500)).await.unwrap();

        let history = store
            .paginated_history(user(1), user(2), 0, 10)
            .await
            .unwrap();
        assert_eq!(history[0].content, "second");
        assert_eq!(history[1].content, "first");
    }

    #[tokio::test]
    async fn timestamps_never_decrease_across_appends() {
        let store = MessageStore::in_memory();
        store.append(message(1, 2, "late clock", 900)).await.unwrap();
        let skewed = store.append(message(1, 2, "early clock", 800)).await.unwrap();

        assert_eq!(skewed.created_at_unix, 900);
        let history = store
            .paginated_history(user(1), user(2), 0, 10)
            .await
            .unwrap();
        assert_eq!(history[0].content, "early clock");
    }

    #[tokio::test]
    async fn pagination_skips_offset_and_caps_limit() {
        let store = MessageStore::in_memory();
        for index in 0..12 {
            store
                .append(message(1, 2, &format!("m{index}"), 1_000 + index))
                .await
                .unwrap();
        }

        let first_page = store
            .paginated_history(user(1), user(2), 0, 10)
            .await
            .unwrap();
        assert_eq!(first_page.len(), 10);
        assert_eq!(first_page[0].content, "m11");

        let second_page = store
            .paginated_history(user(1), user(2), 10, 10)
            .await
            .unwrap();
        let contents: Vec<_> = second_page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m0"]);
    }

    #[tokio::test]
    async fn offset_at_conversation_length_is_empty_not_error() {
        let store = MessageStore::in_memory();
        for index in 0..10 {
            store
                .append(message(1, 2, &format!("m{index}"), 1_000 + index))
                .await
                .unwrap();
        }

        let page = store
            .paginated_history(user(1), user(2), 10, 10)
            .await
            .unwrap();
        assert!(page.is_empty());

        let unknown = store
            .paginated_history(user(7), user(8), 0, 10)
            .await
            .unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_get_unique_ids() {
        let store = MessageStore::in_memory();
        let mut tasks = Vec::new();
        for sender in 1..=8_i64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    ids.push(store.append(message(sender, 99, "x", 1)).await.unwrap().id);
                }
                ids
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.extend(task.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(ids.first().copied(), Some(1));
        assert_eq!(ids.last().copied(), Some(200));
    }

    async fn assert_later_stamp_appended_first_keeps_insertion_order(store: &MessageStore, a: i64) {
        let b = a + 1;
        let first = store.append(message(a, b, "appended_first", 101)).await.unwrap();
        let second = store
            .append(message(b, a, "appended_second", 100))
            .await
            .unwrap();
        assert!(second.id > first.id);
        assert!(second.created_at_unix >= first.created_at_unix);

        let history = store.paginated_history(user(a), user(b), 0, 10).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["appended_second", "appended_first"]);
    }

    #[tokio::test]
    async fn memory_history_follows_insertion_order_across_clock_skew() {
        let store = MessageStore::in_memory();
        assert_later_stamp_appended_first_keeps_insertion_order(&store, 1).await;
    }

    #[tokio::test]
    async fn postgres_history_follows_insertion_order_across_clock_skew() {
        let Ok(database_url) = std::env::var("COURIER_TEST_DATABASE_URL") else {
            eprintln!("skipping postgres store test: COURIER_TEST_DATABASE_URL is unset");
            return;
        };
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(&database_url)
            .unwrap();
        let store = MessageStore::postgres(pool);

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        let a = 5_000_000 + i64::from(nanos % 1_000_000) * 2;
        assert_later_stamp_appended_first_keeps_insertion_order(&store, a).await;
    }
}

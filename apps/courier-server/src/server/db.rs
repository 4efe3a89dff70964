use sqlx::PgPool;

const SCHEMA_INIT_LOCK_ID: i64 = 0x434f_5552_4945_5200;

const CREATE_MESSAGES_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS messages (
                    message_id BIGSERIAL PRIMARY KEY,
                    sender_id BIGINT NOT NULL,
                    receiver_id BIGINT NOT NULL,
                    content TEXT NOT NULL,
                    created_at_unix BIGINT NOT NULL
                )";
const CREATE_MESSAGES_PAIR_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_messages_pair_id
                    ON messages(sender_id, receiver_id, message_id DESC)";

/// Create the message log schema. Safe to run concurrently from several
/// processes; the advisory lock serializes the DDL.
pub(crate) async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_INIT_LOCK_ID)
        .execute(&mut *tx)
        .await?;
    sqlx::query(CREATE_MESSAGES_TABLE_SQL)
        .execute(&mut *tx)
        .await?;
    sqlx::query(CREATE_MESSAGES_PAIR_INDEX_SQL)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!(event = "store.schema", outcome = "ready");
    Ok(())
}

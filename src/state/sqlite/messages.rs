use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{dt_from_db, dt_to_db, with_store_retry, SqliteStore};
use crate::traits::{ConversationStore, NewMessage, Role, StoredMessage};

/// Sliding-window retention per user.
const RETENTION_CAP: i64 = 50;

fn message_from_row(row: &SqliteRow) -> anyhow::Result<StoredMessage> {
    let role_raw: String = row.get("role");
    Ok(StoredMessage {
        id: row.get("id"),
        user_id: row.get("user_id"),
        role: Role::parse(&role_raw).ok_or_else(|| anyhow::anyhow!("bad role '{}'", role_raw))?,
        text: row.get("text"),
        timestamp: dt_from_db(&row.get::<String, _>("timestamp"))?,
        intent: row.get("intent"),
    })
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append_message(&self, msg: &NewMessage) -> anyhow::Result<()> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "INSERT INTO messages (user_id, role, text, timestamp, intent) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&msg.user_id)
            .bind(msg.role.as_str())
            .bind(&msg.text)
            .bind(dt_to_db(Utc::now()))
            .bind(&msg.intent)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "DELETE FROM messages WHERE user_id = ? AND id NOT IN
                 (SELECT id FROM messages WHERE user_id = ? ORDER BY id DESC LIMIT ?)",
            )
            .bind(&msg.user_id)
            .bind(&msg.user_id)
            .bind(RETENTION_CAP)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        with_store_retry(|| async move {
            let rows = sqlx::query(
                "SELECT * FROM (SELECT * FROM messages WHERE user_id = ? ORDER BY id DESC LIMIT ?)
                 ORDER BY id ASC",
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(message_from_row).collect()
        })
        .await
    }
}

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use super::{dt_from_db, dt_to_db, with_store_retry, SqliteStore};
use crate::traits::{SessionRecord, SessionStore};

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get_session(&self, user_id: &str) -> anyhow::Result<SessionRecord> {
        with_store_retry(|| async move {
            let row = sqlx::query("SELECT * FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(row) = row {
                let context_raw: String = row.get("context");
                return Ok(SessionRecord {
                    user_id: row.get("user_id"),
                    state: row.get("state"),
                    context: serde_json::from_str(&context_raw).unwrap_or(serde_json::json!({})),
                    updated_at: dt_from_db(&row.get::<String, _>("updated_at"))?,
                });
            }

            let now = Utc::now();
            sqlx::query(
                "INSERT INTO sessions (user_id, state, context, updated_at) VALUES (?, 'idle', '{}', ?)
                 ON CONFLICT(user_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(dt_to_db(now))
            .execute(&self.pool)
            .await?;

            Ok(SessionRecord {
                user_id: user_id.to_string(),
                state: "idle".to_string(),
                context: serde_json::json!({}),
                updated_at: now,
            })
        })
        .await
    }

    async fn set_session(
        &self,
        user_id: &str,
        state: &str,
        context: &serde_json::Value,
    ) -> anyhow::Result<()> {
        with_store_retry(|| async move {
            sqlx::query(
                "INSERT INTO sessions (user_id, state, context, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(user_id) DO UPDATE SET
                   state = excluded.state,
                   context = excluded.context,
                   updated_at = excluded.updated_at",
            )
            .bind(user_id)
            .bind(state)
            .bind(context.to_string())
            .bind(dt_to_db(Utc::now()))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}

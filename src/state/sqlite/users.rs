use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{dt_from_db, dt_to_db, with_store_retry, SqliteStore};
use crate::traits::{UserProfile, UserStore};

fn user_from_row(row: &SqliteRow) -> anyhow::Result<UserProfile> {
    Ok(UserProfile {
        user_id: row.get("user_id"),
        chat_id: row.get("chat_id"),
        timezone: row.get("timezone"),
        notifications_enabled: row.get::<i64, _>("notifications_enabled") != 0,
        event_reminders_enabled: row.get::<i64, _>("event_reminders_enabled") != 0,
        goal_deadline_warnings_enabled: row.get::<i64, _>("goal_deadline_warnings_enabled") != 0,
        step_reminders_enabled: row.get::<i64, _>("step_reminders_enabled") != 0,
        motivational_messages_enabled: row.get::<i64, _>("motivational_messages_enabled") != 0,
        created_at: dt_from_db(&row.get::<String, _>("created_at"))?,
    })
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get_or_create_user(
        &self,
        user_id: &str,
        chat_id: i64,
        default_timezone: &str,
    ) -> anyhow::Result<UserProfile> {
        with_store_retry(|| async move {
            sqlx::query(
                "INSERT INTO users (user_id, chat_id, timezone, created_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(user_id) DO UPDATE SET chat_id = excluded.chat_id",
            )
            .bind(user_id)
            .bind(chat_id)
            .bind(default_timezone)
            .bind(dt_to_db(Utc::now()))
            .execute(&self.pool)
            .await?;

            let row = sqlx::query("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
            user_from_row(&row)
        })
        .await
    }

    async fn get_user(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
        with_store_retry(|| async move {
            let row = sqlx::query("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(user_from_row).transpose()
        })
        .await
    }

    async fn set_timezone(&self, user_id: &str, timezone: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            timezone.parse::<chrono_tz::Tz>().is_ok(),
            "'{}' is not a valid IANA zone",
            timezone
        );
        with_store_retry(|| async move {
            sqlx::query("UPDATE users SET timezone = ? WHERE user_id = ?")
                .bind(timezone)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn all_users(&self) -> anyhow::Result<Vec<UserProfile>> {
        with_store_retry(|| async move {
            let rows = sqlx::query("SELECT * FROM users ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(user_from_row).collect()
        })
        .await
    }
}

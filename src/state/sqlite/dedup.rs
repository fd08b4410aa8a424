use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use super::{date_to_db, dt_to_db, with_store_retry, SqliteStore};
use crate::traits::DedupStore;

#[async_trait]
impl DedupStore for SqliteStore {
    async fn try_claim(
        &self,
        user_id: &str,
        job_kind: &str,
        entity_key: &str,
        fire_date: NaiveDate,
    ) -> anyhow::Result<bool> {
        with_store_retry(|| async move {
            // INSERT OR IGNORE makes the claim atomic: exactly one caller per
            // local day wins the tuple.
            let result = sqlx::query(
                "INSERT OR IGNORE INTO notification_dedup (user_id, job_kind, entity_key, fire_date, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(job_kind)
            .bind(entity_key)
            .bind(date_to_db(fire_date))
            .bind(dt_to_db(Utc::now()))
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected() == 1)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_claim_same_day_is_rejected() {
        let store = SqliteStore::in_memory().await;
        let day = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();

        assert!(store.try_claim("u1", "event_reminder", "event:5", day).await.unwrap());
        assert!(!store.try_claim("u1", "event_reminder", "event:5", day).await.unwrap());
    }

    #[tokio::test]
    async fn claims_are_scoped_by_all_four_key_parts() {
        let store = SqliteStore::in_memory().await;
        let day = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();

        assert!(store.try_claim("u1", "event_reminder", "event:5", day).await.unwrap());
        assert!(store.try_claim("u2", "event_reminder", "event:5", day).await.unwrap());
        assert!(store.try_claim("u1", "goal_deadline", "event:5", day).await.unwrap());
        assert!(store.try_claim("u1", "event_reminder", "event:6", day).await.unwrap());
        assert!(store.try_claim("u1", "event_reminder", "event:5", next_day).await.unwrap());
    }
}

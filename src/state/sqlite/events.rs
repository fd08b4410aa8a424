use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;

use super::{date_to_db, event_from_row, time_to_db, with_store_retry, SqliteStore};
use crate::traits::{Event, EventFilter, EventPatch, EventStore, NewEvent};

/// Event list ordering: date ascending, NULL time (all-day) last within its
/// date, id breaks ties.
const EVENT_ORDER: &str = "ORDER BY date ASC, (time IS NULL) ASC, time ASC, id ASC";

#[async_trait]
impl EventStore for SqliteStore {
    async fn create_event(&self, user_id: &str, event: &NewEvent) -> anyhow::Result<Event> {
        with_store_retry(|| async move {
            let row = sqlx::query(
                "INSERT INTO events (user_id, title, date, time, duration_minutes, repeat, notes,
                                     event_type, linked_step_id, linked_goal_id,
                                     reminder_minutes_before, reminder_enabled)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING *",
            )
            .bind(user_id)
            .bind(event.title.trim())
            .bind(date_to_db(event.date))
            .bind(event.time.map(time_to_db))
            .bind(event.duration_minutes)
            .bind(&event.repeat)
            .bind(&event.notes)
            .bind(event.event_type.as_str())
            .bind(event.linked_step_id)
            .bind(event.linked_goal_id)
            .bind(event.reminder_minutes_before)
            .bind(event.reminder_enabled as i64)
            .fetch_one(&self.pool)
            .await?;
            event_from_row(&row)
        })
        .await
    }

    async fn get_event(&self, user_id: &str, event_id: i64) -> anyhow::Result<Option<Event>> {
        with_store_retry(|| async move {
            let row = sqlx::query("SELECT * FROM events WHERE id = ? AND user_id = ?")
                .bind(event_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(event_from_row).transpose()
        })
        .await
    }

    async fn search_events(
        &self,
        user_id: &str,
        filter: &EventFilter,
    ) -> anyhow::Result<Vec<Event>> {
        with_store_retry(|| async move {
            let mut sql = String::from("SELECT * FROM events WHERE user_id = ?");
            if filter.title_like.is_some() {
                sql.push_str(" AND title LIKE ?");
            }
            if filter.date_from.is_some() {
                sql.push_str(" AND date >= ?");
            }
            if filter.date_to.is_some() {
                sql.push_str(" AND date <= ?");
            }
            if filter.time_from.is_some() {
                sql.push_str(" AND time IS NOT NULL AND time >= ?");
            }
            if filter.time_to.is_some() {
                sql.push_str(" AND time IS NOT NULL AND time <= ?");
            }
            sql.push(' ');
            sql.push_str(EVENT_ORDER);
            sql.push_str(" LIMIT ?");

            let mut query = sqlx::query(&sql).bind(user_id);
            if let Some(title) = &filter.title_like {
                query = query.bind(format!("%{}%", title));
            }
            if let Some(from) = filter.date_from {
                query = query.bind(date_to_db(from));
            }
            if let Some(to) = filter.date_to {
                query = query.bind(date_to_db(to));
            }
            if let Some(from) = filter.time_from {
                query = query.bind(time_to_db(from));
            }
            if let Some(to) = filter.time_to {
                query = query.bind(time_to_db(to));
            }
            let limit = if filter.limit > 0 { filter.limit } else { 50 };
            query = query.bind(limit);

            let rows = query.fetch_all(&self.pool).await?;
            rows.iter().map(event_from_row).collect()
        })
        .await
    }

    async fn update_event(
        &self,
        user_id: &str,
        event_id: i64,
        patch: &EventPatch,
    ) -> anyhow::Result<Option<Event>> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query("SELECT linked_step_id FROM events WHERE id = ? AND user_id = ?")
                .bind(event_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            let linked_step_id: Option<i64> = row.get("linked_step_id");

            if let Some(title) = &patch.title {
                sqlx::query("UPDATE events SET title = ? WHERE id = ?")
                    .bind(title.trim())
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(date) = patch.date {
                sqlx::query("UPDATE events SET date = ? WHERE id = ?")
                    .bind(date_to_db(date))
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
                if let Some(step_id) = linked_step_id {
                    sqlx::query("UPDATE steps SET planned_date = ? WHERE id = ?")
                        .bind(date_to_db(date))
                        .bind(step_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            if let Some(time) = &patch.time {
                sqlx::query("UPDATE events SET time = ? WHERE id = ?")
                    .bind(time.map(time_to_db))
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
                if let Some(step_id) = linked_step_id {
                    sqlx::query("UPDATE steps SET planned_time = ? WHERE id = ?")
                        .bind(time.map(time_to_db))
                        .bind(step_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            if let Some(duration) = patch.duration_minutes {
                sqlx::query("UPDATE events SET duration_minutes = ? WHERE id = ?")
                    .bind(duration)
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(notes) = &patch.notes {
                sqlx::query("UPDATE events SET notes = ? WHERE id = ?")
                    .bind(notes)
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
            }

            let row = sqlx::query("SELECT * FROM events WHERE id = ?")
                .bind(event_id)
                .fetch_one(&mut *tx)
                .await?;
            let event = event_from_row(&row)?;

            tx.commit().await?;
            Ok(Some(event))
        })
        .await
    }

    async fn delete_event(&self, user_id: &str, event_id: i64) -> anyhow::Result<bool> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query("SELECT linked_step_id FROM events WHERE id = ? AND user_id = ?")
                .bind(event_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                return Ok(false);
            };
            let linked_step_id: Option<i64> = row.get("linked_step_id");

            // Both sides of the link are cleared in the same transaction.
            if let Some(step_id) = linked_step_id {
                sqlx::query("UPDATE steps SET linked_event_id = NULL WHERE id = ?")
                    .bind(step_id)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query("DELETE FROM events WHERE id = ?")
                .bind(event_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(true)
        })
        .await
    }

    async fn events_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<Event>> {
        with_store_retry(|| async move {
            let sql = format!(
                "SELECT * FROM events WHERE user_id = ? AND date >= ? AND date <= ? {EVENT_ORDER}"
            );
            let rows = sqlx::query(&sql)
                .bind(user_id)
                .bind(date_to_db(from))
                .bind(date_to_db(to))
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(event_from_row).collect()
        })
        .await
    }

    async fn reminder_candidates(
        &self,
        user_id: &str,
        from: NaiveDate,
    ) -> anyhow::Result<Vec<Event>> {
        with_store_retry(|| async move {
            let sql = format!(
                "SELECT * FROM events
                 WHERE user_id = ? AND reminder_enabled = 1 AND time IS NOT NULL AND date >= ?
                 {EVENT_ORDER}"
            );
            let rows = sqlx::query(&sql)
                .bind(user_id)
                .bind(date_to_db(from))
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(event_from_row).collect()
        })
        .await
    }
}

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::Row;

use super::{
    date_to_db, dt_to_db, goal_from_row, recompute_progress, step_from_row, time_to_db,
    with_store_retry, SqliteStore,
};
use crate::traits::{
    Event, Goal, GoalDraft, GoalPatch, GoalStatus, GoalStore, GoalWithSteps, NewStep, Step,
    StepPatch, StepPlacement, StepStatus,
};

/// Goal list ordering: active < paused < completed, then target date with
/// nulls last, then id.
const GOAL_ORDER: &str = "ORDER BY CASE status WHEN 'active' THEN 0 WHEN 'paused' THEN 1 ELSE 2 END,
         (target_date IS NULL) ASC, target_date ASC, id ASC";

#[async_trait]
impl GoalStore for SqliteStore {
    async fn create_goal_with_steps(
        &self,
        user_id: &str,
        draft: &GoalDraft,
        steps: &[NewStep],
    ) -> anyhow::Result<GoalWithSteps> {
        let goal_id = with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let goal_id: i64 = sqlx::query(
                "INSERT INTO goals (user_id, title, description, status, target_date, category, priority, created_at)
                 VALUES (?, ?, ?, 'active', ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(user_id)
            .bind(draft.title.trim())
            .bind(&draft.description)
            .bind(draft.target_date.map(date_to_db))
            .bind(&draft.category)
            .bind(draft.priority.unwrap_or(crate::traits::Priority::Medium).as_str())
            .bind(dt_to_db(Utc::now()))
            .fetch_one(&mut *tx)
            .await?
            .get("id");

            for (idx, step) in steps.iter().enumerate() {
                let order = step.order.unwrap_or(idx as i32 + 1);
                sqlx::query(
                    "INSERT INTO steps (goal_id, title, step_order, status, estimated_hours, planned_date, planned_time)
                     VALUES (?, ?, ?, 'pending', ?, ?, ?)",
                )
                .bind(goal_id)
                .bind(step.title.trim())
                .bind(order)
                .bind(step.estimated_hours)
                .bind(step.planned_date.map(date_to_db))
                .bind(step.planned_time.map(time_to_db))
                .execute(&mut *tx)
                .await?;
            }

            recompute_progress(&mut tx, goal_id).await?;
            tx.commit().await?;
            Ok(goal_id)
        })
        .await?;

        self.get_goal_with_steps(user_id, goal_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("goal {} vanished after insert", goal_id))
    }

    async fn get_goal(&self, user_id: &str, goal_id: i64) -> anyhow::Result<Option<Goal>> {
        with_store_retry(|| async move {
            let row = sqlx::query("SELECT * FROM goals WHERE id = ? AND user_id = ?")
                .bind(goal_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(goal_from_row).transpose()
        })
        .await
    }

    async fn get_goal_with_steps(
        &self,
        user_id: &str,
        goal_id: i64,
    ) -> anyhow::Result<Option<GoalWithSteps>> {
        let Some(goal) = self.get_goal(user_id, goal_id).await? else {
            return Ok(None);
        };
        let steps = with_store_retry(|| async move {
            let rows = sqlx::query("SELECT * FROM steps WHERE goal_id = ? ORDER BY step_order ASC")
                .bind(goal_id)
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(step_from_row).collect::<Result<Vec<_>, _>>()
        })
        .await?;
        Ok(Some(GoalWithSteps { goal, steps }))
    }

    async fn list_goals(
        &self,
        user_id: &str,
        status: Option<GoalStatus>,
    ) -> anyhow::Result<Vec<Goal>> {
        with_store_retry(|| async move {
            let rows = match status {
                Some(status) => {
                    let sql = format!(
                        "SELECT * FROM goals WHERE user_id = ? AND status = ? {GOAL_ORDER}"
                    );
                    sqlx::query(&sql)
                        .bind(user_id)
                        .bind(status.as_str())
                        .fetch_all(&self.pool)
                        .await?
                }
                None => {
                    let sql = format!("SELECT * FROM goals WHERE user_id = ? {GOAL_ORDER}");
                    sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?
                }
            };
            rows.iter().map(goal_from_row).collect()
        })
        .await
    }

    async fn update_goal(
        &self,
        user_id: &str,
        goal_id: i64,
        patch: &GoalPatch,
    ) -> anyhow::Result<Option<Goal>> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            if let Some(title) = &patch.title {
                sqlx::query("UPDATE goals SET title = ? WHERE id = ? AND user_id = ?")
                    .bind(title.trim())
                    .bind(goal_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(description) = &patch.description {
                sqlx::query("UPDATE goals SET description = ? WHERE id = ? AND user_id = ?")
                    .bind(description)
                    .bind(goal_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(status) = patch.status {
                sqlx::query("UPDATE goals SET status = ? WHERE id = ? AND user_id = ?")
                    .bind(status.as_str())
                    .bind(goal_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(target_date) = &patch.target_date {
                sqlx::query("UPDATE goals SET target_date = ? WHERE id = ? AND user_id = ?")
                    .bind(target_date.map(date_to_db))
                    .bind(goal_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(category) = &patch.category {
                sqlx::query("UPDATE goals SET category = ? WHERE id = ? AND user_id = ?")
                    .bind(category)
                    .bind(goal_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(priority) = patch.priority {
                sqlx::query("UPDATE goals SET priority = ? WHERE id = ? AND user_id = ?")
                    .bind(priority.as_str())
                    .bind(goal_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(())
        })
        .await?;
        self.get_goal(user_id, goal_id).await
    }

    async fn delete_goal(&self, user_id: &str, goal_id: i64) -> anyhow::Result<bool> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let owned = sqlx::query("SELECT id FROM goals WHERE id = ? AND user_id = ?")
                .bind(goal_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            if owned.is_none() {
                return Ok(false);
            }

            sqlx::query("DELETE FROM events WHERE linked_goal_id = ? AND event_type = 'goal_step'")
                .bind(goal_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM steps WHERE goal_id = ?")
                .bind(goal_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM goals WHERE id = ?")
                .bind(goal_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(true)
        })
        .await
    }

    async fn add_step(
        &self,
        user_id: &str,
        goal_id: i64,
        step: &NewStep,
    ) -> anyhow::Result<Step> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let owned = sqlx::query("SELECT id FROM goals WHERE id = ? AND user_id = ?")
                .bind(goal_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            anyhow::ensure!(owned.is_some(), "goal {} not found", goal_id);

            let order = match step.order {
                Some(order) => order,
                None => {
                    let max: Option<i32> =
                        sqlx::query("SELECT MAX(step_order) AS m FROM steps WHERE goal_id = ?")
                            .bind(goal_id)
                            .fetch_one(&mut *tx)
                            .await?
                            .get("m");
                    max.unwrap_or(0) + 1
                }
            };

            let step_id: i64 = sqlx::query(
                "INSERT INTO steps (goal_id, title, step_order, status, estimated_hours, planned_date, planned_time)
                 VALUES (?, ?, ?, 'pending', ?, ?, ?)
                 RETURNING id",
            )
            .bind(goal_id)
            .bind(step.title.trim())
            .bind(order)
            .bind(step.estimated_hours)
            .bind(step.planned_date.map(date_to_db))
            .bind(step.planned_time.map(time_to_db))
            .fetch_one(&mut *tx)
            .await?
            .get("id");

            // A dated step gets a linked calendar event right away.
            if let Some(date) = step.planned_date {
                let event_id: i64 = sqlx::query(
                    "INSERT INTO events (user_id, title, date, time, duration_minutes, event_type, linked_step_id, linked_goal_id)
                     VALUES (?, ?, ?, ?, 60, 'goal_step', ?, ?)
                     RETURNING id",
                )
                .bind(user_id)
                .bind(step.title.trim())
                .bind(date_to_db(date))
                .bind(step.planned_time.map(time_to_db))
                .bind(step_id)
                .bind(goal_id)
                .fetch_one(&mut *tx)
                .await?
                .get("id");

                sqlx::query("UPDATE steps SET linked_event_id = ? WHERE id = ?")
                    .bind(event_id)
                    .bind(step_id)
                    .execute(&mut *tx)
                    .await?;
            }

            recompute_progress(&mut tx, goal_id).await?;

            let row = sqlx::query("SELECT * FROM steps WHERE id = ?")
                .bind(step_id)
                .fetch_one(&mut *tx)
                .await?;
            let step = step_from_row(&row)?;

            tx.commit().await?;
            Ok(step)
        })
        .await
    }

    async fn get_step(&self, user_id: &str, step_id: i64) -> anyhow::Result<Option<Step>> {
        with_store_retry(|| async move {
            let row = sqlx::query(
                "SELECT s.* FROM steps s JOIN goals g ON g.id = s.goal_id
                 WHERE s.id = ? AND g.user_id = ?",
            )
            .bind(step_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(step_from_row).transpose()
        })
        .await
    }

    async fn update_step_status(
        &self,
        user_id: &str,
        step_id: i64,
        status: StepStatus,
    ) -> anyhow::Result<Option<(Step, Goal)>> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(
                "SELECT s.goal_id FROM steps s JOIN goals g ON g.id = s.goal_id
                 WHERE s.id = ? AND g.user_id = ?",
            )
            .bind(step_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            let goal_id: i64 = row.get("goal_id");

            let completed_at = if status == StepStatus::Completed {
                Some(dt_to_db(Utc::now()))
            } else {
                None
            };
            sqlx::query("UPDATE steps SET status = ?, completed_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(completed_at)
                .bind(step_id)
                .execute(&mut *tx)
                .await?;

            recompute_progress(&mut tx, goal_id).await?;

            let step_row = sqlx::query("SELECT * FROM steps WHERE id = ?")
                .bind(step_id)
                .fetch_one(&mut *tx)
                .await?;
            let goal_row = sqlx::query("SELECT * FROM goals WHERE id = ?")
                .bind(goal_id)
                .fetch_one(&mut *tx)
                .await?;
            let result = (step_from_row(&step_row)?, goal_from_row(&goal_row)?);

            tx.commit().await?;
            Ok(Some(result))
        })
        .await
    }

    async fn update_step(
        &self,
        user_id: &str,
        step_id: i64,
        patch: &StepPatch,
    ) -> anyhow::Result<Option<Step>> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(
                "SELECT s.id, s.linked_event_id FROM steps s JOIN goals g ON g.id = s.goal_id
                 WHERE s.id = ? AND g.user_id = ?",
            )
            .bind(step_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            let linked_event_id: Option<i64> = row.get("linked_event_id");

            if let Some(title) = &patch.title {
                sqlx::query("UPDATE steps SET title = ? WHERE id = ?")
                    .bind(title.trim())
                    .bind(step_id)
                    .execute(&mut *tx)
                    .await?;
                if let Some(event_id) = linked_event_id {
                    sqlx::query("UPDATE events SET title = ? WHERE id = ?")
                        .bind(title.trim())
                        .bind(event_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            if let Some(date) = &patch.planned_date {
                sqlx::query("UPDATE steps SET planned_date = ? WHERE id = ?")
                    .bind(date.map(date_to_db))
                    .bind(step_id)
                    .execute(&mut *tx)
                    .await?;
                if let (Some(event_id), Some(date)) = (linked_event_id, date) {
                    sqlx::query("UPDATE events SET date = ? WHERE id = ?")
                        .bind(date_to_db(*date))
                        .bind(event_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            if let Some(time) = &patch.planned_time {
                sqlx::query("UPDATE steps SET planned_time = ? WHERE id = ?")
                    .bind(time.map(time_to_db))
                    .bind(step_id)
                    .execute(&mut *tx)
                    .await?;
                if let Some(event_id) = linked_event_id {
                    sqlx::query("UPDATE events SET time = ? WHERE id = ?")
                        .bind(time.map(time_to_db))
                        .bind(event_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }

            let step_row = sqlx::query("SELECT * FROM steps WHERE id = ?")
                .bind(step_id)
                .fetch_one(&mut *tx)
                .await?;
            let step = step_from_row(&step_row)?;

            tx.commit().await?;
            Ok(Some(step))
        })
        .await
    }

    async fn delete_step(&self, user_id: &str, step_id: i64) -> anyhow::Result<bool> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(
                "SELECT s.goal_id, s.linked_event_id FROM steps s JOIN goals g ON g.id = s.goal_id
                 WHERE s.id = ? AND g.user_id = ?",
            )
            .bind(step_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(row) = row else {
                return Ok(false);
            };
            let goal_id: i64 = row.get("goal_id");
            let linked_event_id: Option<i64> = row.get("linked_event_id");

            if let Some(event_id) = linked_event_id {
                sqlx::query("DELETE FROM events WHERE id = ?")
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query("DELETE FROM steps WHERE id = ?")
                .bind(step_id)
                .execute(&mut *tx)
                .await?;

            // Close the gap so orders stay a permutation of 1..=N. Ascending
            // renumber never collides: each target slot is already freed.
            let remaining =
                sqlx::query("SELECT id FROM steps WHERE goal_id = ? ORDER BY step_order ASC")
                    .bind(goal_id)
                    .fetch_all(&mut *tx)
                    .await?;
            for (idx, r) in remaining.iter().enumerate() {
                let id: i64 = r.get("id");
                sqlx::query("UPDATE steps SET step_order = ? WHERE id = ?")
                    .bind(idx as i32 + 1)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }

            recompute_progress(&mut tx, goal_id).await?;
            tx.commit().await?;
            Ok(true)
        })
        .await
    }

    async fn attach_schedule(
        &self,
        user_id: &str,
        goal_id: i64,
        placements: &[StepPlacement],
    ) -> anyhow::Result<Vec<Event>> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;
            let mut created = Vec::with_capacity(placements.len());

            for placement in placements {
                let title: String = sqlx::query("SELECT title FROM steps WHERE id = ?")
                    .bind(placement.step_id)
                    .fetch_one(&mut *tx)
                    .await?
                    .get("title");

                let event_id: i64 = sqlx::query(
                    "INSERT INTO events (user_id, title, date, time, duration_minutes, event_type, linked_step_id, linked_goal_id)
                     VALUES (?, ?, ?, ?, ?, 'goal_step', ?, ?)
                     RETURNING id",
                )
                .bind(user_id)
                .bind(&title)
                .bind(date_to_db(placement.date))
                .bind(time_to_db(placement.time))
                .bind(placement.duration_minutes)
                .bind(placement.step_id)
                .bind(goal_id)
                .fetch_one(&mut *tx)
                .await?
                .get("id");

                sqlx::query(
                    "UPDATE steps SET planned_date = ?, planned_time = ?, duration_minutes = ?, linked_event_id = ?
                     WHERE id = ?",
                )
                .bind(date_to_db(placement.date))
                .bind(time_to_db(placement.time))
                .bind(placement.duration_minutes)
                .bind(event_id)
                .bind(placement.step_id)
                .execute(&mut *tx)
                .await?;

                let row = sqlx::query("SELECT * FROM events WHERE id = ?")
                    .bind(event_id)
                    .fetch_one(&mut *tx)
                    .await?;
                created.push(super::event_from_row(&row)?);
            }

            sqlx::query("UPDATE goals SET is_scheduled = 1 WHERE id = ? AND user_id = ?")
                .bind(goal_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(created)
        })
        .await
    }

    async fn clear_schedule(&self, user_id: &str, goal_id: i64) -> anyhow::Result<()> {
        with_store_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "DELETE FROM events WHERE user_id = ? AND linked_goal_id = ? AND event_type = 'goal_step'",
            )
            .bind(user_id)
            .bind(goal_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE steps SET planned_date = NULL, planned_time = NULL, duration_minutes = NULL, linked_event_id = NULL
                 WHERE goal_id = ?",
            )
            .bind(goal_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE goals SET is_scheduled = 0 WHERE id = ? AND user_id = ?")
                .bind(goal_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn active_goals(&self, user_id: &str) -> anyhow::Result<Vec<Goal>> {
        self.list_goals(user_id, Some(GoalStatus::Active)).await
    }

    async fn active_goals_with_target_dates(
        &self,
        user_id: &str,
        dates: &[NaiveDate],
    ) -> anyhow::Result<Vec<Goal>> {
        if dates.is_empty() {
            return Ok(vec![]);
        }
        with_store_retry(|| async move {
            let placeholders = vec!["?"; dates.len()].join(", ");
            let sql = format!(
                "SELECT * FROM goals WHERE user_id = ? AND status = 'active' AND target_date IN ({placeholders})
                 ORDER BY target_date ASC, id ASC"
            );
            let mut query = sqlx::query(&sql).bind(user_id);
            for date in dates {
                query = query.bind(date_to_db(*date));
            }
            let rows = query.fetch_all(&self.pool).await?;
            rows.iter().map(goal_from_row).collect()
        })
        .await
    }

    async fn overdue_steps(
        &self,
        user_id: &str,
        before: NaiveDate,
    ) -> anyhow::Result<Vec<(Step, Goal)>> {
        let rows = with_store_retry(|| async move {
            let rows = sqlx::query(
                "SELECT s.id AS step_id, g.id AS g_id FROM steps s
                 JOIN goals g ON g.id = s.goal_id
                 WHERE g.user_id = ? AND g.status = 'active'
                   AND s.status IN ('pending', 'in_progress')
                   AND s.planned_date IS NOT NULL AND s.planned_date < ?
                 ORDER BY g.id ASC, s.step_order ASC",
            )
            .bind(user_id)
            .bind(date_to_db(before))
            .fetch_all(&self.pool)
            .await?;
            let ids: Vec<(i64, i64)> = rows
                .iter()
                .map(|row| (row.get("step_id"), row.get("g_id")))
                .collect();
            Ok(ids)
        })
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for (step_id, g_id) in rows {
            let step = self
                .get_step(user_id, step_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("step {} vanished", step_id))?;
            let goal = self
                .get_goal(user_id, g_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("goal {} vanished", g_id))?;
            result.push((step, goal));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{EventStore, UserStore};

    async fn store_with_user() -> SqliteStore {
        let store = SqliteStore::in_memory().await;
        store
            .get_or_create_user("u1", 1, "Europe/Moscow")
            .await
            .unwrap();
        store
    }

    fn draft(title: &str) -> GoalDraft {
        GoalDraft {
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn steps(titles: &[&str]) -> Vec<NewStep> {
        titles
            .iter()
            .map(|t| NewStep {
                title: t.to_string(),
                order: None,
                estimated_hours: Some(2.0),
                planned_date: None,
                planned_time: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn progress_is_derived_and_rounds() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Выучить испанский"), &steps(&["a", "b", "c"]))
            .await
            .unwrap();
        assert_eq!(gws.goal.progress_percent, 0);
        assert_eq!(gws.steps.len(), 3);

        let (_, goal) = store
            .update_step_status("u1", gws.steps[0].id, StepStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(goal.progress_percent, 33);
        assert_eq!(goal.status, GoalStatus::Active);
    }

    #[tokio::test]
    async fn completing_all_steps_completes_goal_and_reopening_reverts() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Прочитать книгу"), &steps(&["a", "b"]))
            .await
            .unwrap();

        store
            .update_step_status("u1", gws.steps[0].id, StepStatus::Completed)
            .await
            .unwrap();
        let (step, goal) = store
            .update_step_status("u1", gws.steps[1].id, StepStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(goal.status, GoalStatus::Completed);
        assert_eq!(goal.progress_percent, 100);
        assert!(step.completed_at.is_some());

        let (step, goal) = store
            .update_step_status("u1", gws.steps[1].id, StepStatus::Pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(goal.status, GoalStatus::Active);
        assert_eq!(goal.progress_percent, 50);
        assert!(step.completed_at.is_none());
    }

    #[tokio::test]
    async fn progress_round_trip_restores_previous_value() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Цель с шагами"), &steps(&["a", "b", "c", "d"]))
            .await
            .unwrap();
        store
            .update_step_status("u1", gws.steps[0].id, StepStatus::Completed)
            .await
            .unwrap();
        let before = store.get_goal("u1", gws.goal.id).await.unwrap().unwrap();

        store
            .update_step_status("u1", gws.steps[1].id, StepStatus::Completed)
            .await
            .unwrap();
        store
            .update_step_status("u1", gws.steps[1].id, StepStatus::Pending)
            .await
            .unwrap();

        let after = store.get_goal("u1", gws.goal.id).await.unwrap().unwrap();
        assert_eq!(before.progress_percent, after.progress_percent);
        assert_eq!(before.status, after.status);
    }

    #[tokio::test]
    async fn zero_step_goal_stays_active_at_zero() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Без шагов"), &[])
            .await
            .unwrap();
        assert_eq!(gws.goal.progress_percent, 0);
        assert_eq!(gws.goal.status, GoalStatus::Active);
    }

    #[tokio::test]
    async fn add_step_appends_at_max_plus_one() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Цель"), &steps(&["a", "b"]))
            .await
            .unwrap();

        let step = store
            .add_step(
                "u1",
                gws.goal.id,
                &NewStep {
                    title: "c".into(),
                    order: None,
                    estimated_hours: None,
                    planned_date: None,
                    planned_time: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(step.order, 3);
    }

    #[tokio::test]
    async fn add_step_with_taken_order_is_a_constraint_violation() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Цель"), &steps(&["a", "b"]))
            .await
            .unwrap();

        let err = store
            .add_step(
                "u1",
                gws.goal.id,
                &NewStep {
                    title: "dup".into(),
                    order: Some(1),
                    estimated_hours: None,
                    planned_date: None,
                    planned_time: None,
                },
            )
            .await
            .unwrap_err();
        let sqlx_err = err.downcast_ref::<sqlx::Error>().expect("sqlx error");
        assert!(matches!(sqlx_err, sqlx::Error::Database(db) if db.is_unique_violation()));
    }

    #[tokio::test]
    async fn add_step_with_date_creates_linked_event() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Цель"), &[])
            .await
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let step = store
            .add_step(
                "u1",
                gws.goal.id,
                &NewStep {
                    title: "шаг с датой".into(),
                    order: None,
                    estimated_hours: None,
                    planned_date: Some(date),
                    planned_time: crate::utils::parse_time("10:00"),
                },
            )
            .await
            .unwrap();

        let event_id = step.linked_event_id.expect("linked event");
        let event = store.get_event("u1", event_id).await.unwrap().unwrap();
        assert_eq!(event.linked_step_id, Some(step.id));
        assert_eq!(event.linked_goal_id, Some(gws.goal.id));
        assert_eq!(event.date, date);
    }

    #[tokio::test]
    async fn delete_step_removes_linked_event_and_renumbers() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Цель"), &steps(&["a", "b", "c"]))
            .await
            .unwrap();

        let placements = vec![StepPlacement {
            step_id: gws.steps[1].id,
            date: NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(),
            time: crate::utils::parse_time("18:00").unwrap(),
            duration_minutes: 120,
        }];
        store
            .attach_schedule("u1", gws.goal.id, &placements)
            .await
            .unwrap();

        let scheduled = store.get_step("u1", gws.steps[1].id).await.unwrap().unwrap();
        let event_id = scheduled.linked_event_id.unwrap();

        assert!(store.delete_step("u1", gws.steps[1].id).await.unwrap());
        assert!(store.get_event("u1", event_id).await.unwrap().is_none());

        let remaining = store
            .get_goal_with_steps("u1", gws.goal.id)
            .await
            .unwrap()
            .unwrap()
            .steps;
        let orders: Vec<i32> = remaining.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[tokio::test]
    async fn delete_goal_cascades_steps_and_events() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Цель"), &steps(&["a", "b"]))
            .await
            .unwrap();
        let placements: Vec<StepPlacement> = gws
            .steps
            .iter()
            .map(|s| StepPlacement {
                step_id: s.id,
                date: NaiveDate::from_ymd_opt(2026, 9, 3).unwrap(),
                time: crate::utils::parse_time("18:00").unwrap(),
                duration_minutes: 60,
            })
            .collect();
        let events = store
            .attach_schedule("u1", gws.goal.id, &placements)
            .await
            .unwrap();

        assert!(store.delete_goal("u1", gws.goal.id).await.unwrap());
        assert!(store.get_goal("u1", gws.goal.id).await.unwrap().is_none());
        for event in events {
            assert!(store.get_event("u1", event.id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn attach_and_clear_schedule_round_trip() {
        let store = store_with_user().await;
        let gws = store
            .create_goal_with_steps("u1", &draft("Цель"), &steps(&["a"]))
            .await
            .unwrap();
        let placements = vec![StepPlacement {
            step_id: gws.steps[0].id,
            date: NaiveDate::from_ymd_opt(2026, 9, 7).unwrap(),
            time: crate::utils::parse_time("18:00").unwrap(),
            duration_minutes: 90,
        }];

        store
            .attach_schedule("u1", gws.goal.id, &placements)
            .await
            .unwrap();
        let goal = store.get_goal("u1", gws.goal.id).await.unwrap().unwrap();
        assert!(goal.is_scheduled);

        store.clear_schedule("u1", gws.goal.id).await.unwrap();
        let goal = store.get_goal("u1", gws.goal.id).await.unwrap().unwrap();
        assert!(!goal.is_scheduled);
        let step = store.get_step("u1", gws.steps[0].id).await.unwrap().unwrap();
        assert!(step.planned_date.is_none());
        assert!(step.linked_event_id.is_none());
    }

    #[tokio::test]
    async fn goal_list_ordering_puts_active_first_then_deadline() {
        let store = store_with_user().await;
        let g1 = store
            .create_goal_with_steps("u1", &draft("Первая"), &steps(&["a"]))
            .await
            .unwrap();
        let g2 = store
            .create_goal_with_steps(
                "u1",
                &GoalDraft {
                    title: "Вторая".into(),
                    target_date: NaiveDate::from_ymd_opt(2026, 8, 20),
                    ..Default::default()
                },
                &[],
            )
            .await
            .unwrap();
        // Complete the first goal entirely.
        store
            .update_step_status("u1", g1.steps[0].id, StepStatus::Completed)
            .await
            .unwrap();

        let goals = store.list_goals("u1", None).await.unwrap();
        assert_eq!(goals[0].id, g2.goal.id);
        assert_eq!(goals[1].id, g1.goal.id);
    }

    #[tokio::test]
    async fn goals_scoped_to_their_user() {
        let store = store_with_user().await;
        store.get_or_create_user("u2", 2, "UTC").await.unwrap();
        let gws = store
            .create_goal_with_steps("u1", &draft("Чужая цель"), &[])
            .await
            .unwrap();

        assert!(store.get_goal("u2", gws.goal.id).await.unwrap().is_none());
        assert!(!store.delete_goal("u2", gws.goal.id).await.unwrap());
    }
}

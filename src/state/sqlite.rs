//! SQLite-backed domain store. One impl file per store concern; shared row
//! mapping and schema setup live here.
//!
//! Storage conventions: datetimes are RFC 3339 UTC, dates are `YYYY-MM-DD`,
//! times are `HH:MM`. Rendering into the user's zone happens upstream.

mod dedup;
mod events;
mod goals;
mod messages;
mod session;
mod users;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::CoreError;
use crate::traits::{Event, EventType, Goal, GoalStatus, Priority, Step, StepStatus};

/// Backoff schedule for transient store I/O, mirroring the outbound
/// adapters. Constraint violations and row-shape errors are never retried.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(200), Duration::from_secs(1)];

fn is_transient(e: &anyhow::Error) -> bool {
    match e.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => {
            !(db.is_unique_violation() || db.is_foreign_key_violation())
        }
        Some(_) => true,
        // Row mapping and other non-sqlx failures are deterministic.
        None => false,
    }
}

/// Run a store operation, retrying transient failures on the backoff
/// schedule. Every trait method body goes through this; a dropped
/// transaction rolls back, so a re-run always starts clean.
pub(crate) async fn with_store_retry<T, F, Fut>(op: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut delays = RETRY_DELAYS.iter();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => match delays.next() {
                Some(delay) => {
                    tracing::debug!("transient store failure, retrying: {:#}", e);
                    tokio::time::sleep(*delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect, create the schema, and probe the store. Failures here are
    /// fatal for startup (exit code 2).
    pub async fn connect(dsn: &str, acquire_timeout: Duration) -> Result<Self, CoreError> {
        let opts = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| CoreError::StartupStoreUnreachable(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(acquire_timeout)
            .foreign_keys(true);

        // A pooled :memory: database is one database per connection; keep a
        // single connection so tests observe their own writes.
        let max_connections = if dsn.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(opts)
            .await
            .map_err(|e| CoreError::StartupStoreUnreachable(e.to_string()))?;

        init_schema(&pool)
            .await
            .map_err(|e| CoreError::StartupStoreUnreachable(e.to_string()))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> Self {
        Self::connect("sqlite::memory:", Duration::from_secs(5))
            .await
            .expect("in-memory store")
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            chat_id INTEGER NOT NULL,
            timezone TEXT NOT NULL,
            notifications_enabled INTEGER NOT NULL DEFAULT 1,
            event_reminders_enabled INTEGER NOT NULL DEFAULT 1,
            goal_deadline_warnings_enabled INTEGER NOT NULL DEFAULT 1,
            step_reminders_enabled INTEGER NOT NULL DEFAULT 1,
            motivational_messages_enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS goals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            progress_percent INTEGER NOT NULL DEFAULT 0,
            target_date TEXT,
            category TEXT,
            priority TEXT NOT NULL DEFAULT 'medium',
            is_scheduled INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_goals_user ON goals(user_id, status)",
        "CREATE TABLE IF NOT EXISTS steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            goal_id INTEGER NOT NULL REFERENCES goals(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            step_order INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            estimated_hours REAL,
            completed_at TEXT,
            planned_date TEXT,
            planned_time TEXT,
            duration_minutes INTEGER,
            linked_event_id INTEGER,
            UNIQUE(goal_id, step_order)
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_steps_linked_event
         ON steps(linked_event_id) WHERE linked_event_id IS NOT NULL",
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT,
            duration_minutes INTEGER NOT NULL DEFAULT 60,
            repeat TEXT,
            notes TEXT,
            event_type TEXT NOT NULL DEFAULT 'user',
            linked_step_id INTEGER,
            linked_goal_id INTEGER,
            reminder_minutes_before INTEGER NOT NULL DEFAULT 15,
            reminder_enabled INTEGER NOT NULL DEFAULT 1
        )",
        "CREATE INDEX IF NOT EXISTS idx_events_user_date ON events(user_id, date)",
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            text TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            intent TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id, id)",
        "CREATE TABLE IF NOT EXISTS sessions (
            user_id TEXT PRIMARY KEY,
            state TEXT NOT NULL DEFAULT 'idle',
            context TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS notification_dedup (
            user_id TEXT NOT NULL,
            job_kind TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            fire_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (user_id, job_kind, entity_key, fire_date)
        )",
    ];

    for stmt in statements {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

// ---- text <-> typed column helpers ----

pub(crate) fn dt_to_db(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn dt_from_db(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

pub(crate) fn date_to_db(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn date_from_db(raw: &str) -> anyhow::Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(raw, "%Y-%m-%d")?)
}

pub(crate) fn time_to_db(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub(crate) fn time_from_db(raw: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(Into::into)
}

fn opt_date_from_db(raw: Option<String>) -> anyhow::Result<Option<NaiveDate>> {
    raw.map(|s| date_from_db(&s)).transpose()
}

fn opt_time_from_db(raw: Option<String>) -> anyhow::Result<Option<NaiveTime>> {
    raw.map(|s| time_from_db(&s)).transpose()
}

// ---- row mappers ----

pub(crate) fn goal_from_row(row: &SqliteRow) -> anyhow::Result<Goal> {
    let status_raw: String = row.get("status");
    let priority_raw: String = row.get("priority");
    Ok(Goal {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: GoalStatus::parse(&status_raw)
            .ok_or_else(|| anyhow::anyhow!("bad goal status '{}'", status_raw))?,
        progress_percent: row.get("progress_percent"),
        target_date: opt_date_from_db(row.get("target_date"))?,
        category: row.get("category"),
        priority: Priority::parse(&priority_raw)
            .ok_or_else(|| anyhow::anyhow!("bad priority '{}'", priority_raw))?,
        is_scheduled: row.get::<i64, _>("is_scheduled") != 0,
        created_at: dt_from_db(&row.get::<String, _>("created_at"))?,
    })
}

pub(crate) fn step_from_row(row: &SqliteRow) -> anyhow::Result<Step> {
    let status_raw: String = row.get("status");
    Ok(Step {
        id: row.get("id"),
        goal_id: row.get("goal_id"),
        title: row.get("title"),
        order: row.get("step_order"),
        status: StepStatus::parse(&status_raw)
            .ok_or_else(|| anyhow::anyhow!("bad step status '{}'", status_raw))?,
        estimated_hours: row.get("estimated_hours"),
        completed_at: row
            .get::<Option<String>, _>("completed_at")
            .map(|s| dt_from_db(&s))
            .transpose()?,
        planned_date: opt_date_from_db(row.get("planned_date"))?,
        planned_time: opt_time_from_db(row.get("planned_time"))?,
        duration_minutes: row.get("duration_minutes"),
        linked_event_id: row.get("linked_event_id"),
    })
}

pub(crate) fn event_from_row(row: &SqliteRow) -> anyhow::Result<Event> {
    let type_raw: String = row.get("event_type");
    Ok(Event {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        date: date_from_db(&row.get::<String, _>("date"))?,
        time: opt_time_from_db(row.get("time"))?,
        duration_minutes: row.get("duration_minutes"),
        repeat: row.get("repeat"),
        notes: row.get("notes"),
        event_type: EventType::parse(&type_raw)
            .ok_or_else(|| anyhow::anyhow!("bad event type '{}'", type_raw))?,
        linked_step_id: row.get("linked_step_id"),
        linked_goal_id: row.get("linked_goal_id"),
        reminder_minutes_before: row.get("reminder_minutes_before"),
        reminder_enabled: row.get::<i64, _>("reminder_enabled") != 0,
    })
}

/// Recompute a goal's derived progress inside the caller's transaction, and
/// auto-complete (or reactivate) the goal. Zero steps means zero progress
/// and never `completed`.
pub(crate) async fn recompute_progress(
    conn: &mut SqliteConnection,
    goal_id: i64,
) -> anyhow::Result<()> {
    let counts = sqlx::query(
        "SELECT COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS done
         FROM steps WHERE goal_id = ?",
    )
    .bind(goal_id)
    .fetch_one(&mut *conn)
    .await?;

    let total: i64 = counts.get("total");
    let done: i64 = counts.get("done");

    let progress = if total == 0 {
        0i64
    } else {
        (100.0 * done as f64 / total as f64).round() as i64
    };

    let current: Option<String> = sqlx::query("SELECT status FROM goals WHERE id = ?")
        .bind(goal_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|r| r.get("status"));

    let Some(current) = current else {
        return Ok(());
    };

    let new_status = if total > 0 && done == total {
        "completed"
    } else if current == "completed" {
        // A step was reopened or removed; the goal is live again.
        "active"
    } else {
        current.as_str()
    };

    sqlx::query("UPDATE goals SET progress_percent = ?, status = ? WHERE id = ?")
        .bind(progress)
        .bind(new_status)
        .bind(goal_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_once_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = with_store_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(anyhow::Error::new(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_surfaces_after_the_schedule() {
        let calls = AtomicUsize::new(0);
        let result: anyhow::Result<()> = with_store_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::Error::new(sqlx::Error::PoolTimedOut)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1 + RETRY_DELAYS.len());
    }

    #[tokio::test(start_paused = true)]
    async fn deterministic_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: anyhow::Result<()> = with_store_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("bad row shape")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unique_violations_count_as_deterministic() {
        let store = SqliteStore::in_memory().await;
        let insert = "INSERT INTO notification_dedup (user_id, job_kind, entity_key, fire_date, created_at)
                      VALUES ('u1', 'k', 'e', '2026-08-02', '2026-08-02T00:00:00Z')";
        sqlx::query(insert).execute(store.pool()).await.unwrap();
        let err = sqlx::query(insert).execute(store.pool()).await.unwrap_err();
        assert!(!is_transient(&anyhow::Error::new(err)));
        assert!(is_transient(&anyhow::Error::new(sqlx::Error::PoolTimedOut)));
        assert!(!is_transient(&anyhow::anyhow!("mapper failure")));
    }
}

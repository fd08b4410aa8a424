//! Per-turn prompt bundle assembly (component A).
//!
//! Read-only: the assembler never calls the model and degrades by omitting
//! optional slots when a store read fails. Slot sizes are capped so the
//! rendered template always fits the model context window.

use chrono::{Duration, Utc};
use chrono_tz::Tz;

use crate::traits::store_prelude::*;
use crate::traits::{Role, SessionRecord, Store, UserProfile};
use crate::utils::truncate_str;

const MAX_GOALS: usize = 20;
const MAX_EVENTS: usize = 30;
const HISTORY_TURNS: i64 = 5;
const TITLE_CAP: usize = 80;

#[derive(Debug, Clone)]
pub struct GoalSlot {
    pub title: String,
    pub progress_percent: i32,
    pub target_date: Option<chrono::NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct EventSlot {
    pub title: String,
    pub date: chrono::NaiveDate,
    pub time: Option<chrono::NaiveTime>,
}

#[derive(Debug, Clone)]
pub struct PromptBundle {
    pub user_name: String,
    pub timezone: String,
    /// Current moment in the user's zone, minute precision.
    pub now_local: String,
    pub today_local: chrono::NaiveDate,
    pub active_goals: Vec<GoalSlot>,
    pub upcoming_events: Vec<EventSlot>,
    /// Last turns, oldest first.
    pub history: Vec<(Role, String)>,
    /// Serialized dialog state when non-idle.
    pub state_context: Option<String>,
}

pub async fn assemble(
    store: &dyn Store,
    user: &UserProfile,
    session: &SessionRecord,
    display_name: Option<&str>,
) -> PromptBundle {
    let tz: Tz = user.tz();
    let now_local = Utc::now().with_timezone(&tz);
    let today = now_local.date_naive();

    let active_goals = match store.active_goals(&user.user_id).await {
        Ok(goals) => goals
            .into_iter()
            .take(MAX_GOALS)
            .map(|g| GoalSlot {
                title: truncate_str(&g.title, TITLE_CAP),
                progress_percent: g.progress_percent,
                target_date: g.target_date,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(user_id = %user.user_id, "bundle: goals slot dropped: {:#}", e);
            vec![]
        }
    };

    let upcoming_events = match store
        .events_between(&user.user_id, today, today + Duration::days(7))
        .await
    {
        Ok(events) => events
            .into_iter()
            .take(MAX_EVENTS)
            .map(|e| EventSlot {
                title: truncate_str(&e.title, TITLE_CAP),
                date: e.date,
                time: e.time,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(user_id = %user.user_id, "bundle: events slot dropped: {:#}", e);
            vec![]
        }
    };

    let history = match store.recent_messages(&user.user_id, HISTORY_TURNS).await {
        Ok(messages) => messages
            .into_iter()
            .map(|m| (m.role, truncate_str(&m.text, 300)))
            .collect(),
        Err(e) => {
            tracing::warn!(user_id = %user.user_id, "bundle: history slot dropped: {:#}", e);
            vec![]
        }
    };

    let state_context = if session.state == "idle" {
        None
    } else {
        Some(format!(
            "{}: {}",
            session.state,
            truncate_str(&session.context.to_string(), 500)
        ))
    };

    PromptBundle {
        user_name: display_name
            .map(str::to_string)
            .unwrap_or_else(|| user.user_id.clone()),
        timezone: user.timezone.clone(),
        now_local: now_local.format("%Y-%m-%d %H:%M").to_string(),
        today_local: today,
        active_goals,
        upcoming_events,
        history,
        state_context,
    }
}

//! Store traits, one per concern. `SqliteStore` implements all of them; the
//! facade supertrait `Store` is what gets passed around as a trait object.
//!
//! Multi-row mutations (goal + steps + events, cascade deletes, progress
//! recomputation) are single transactions inside the implementing store, so a
//! caller can never observe a half-applied write.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};

use super::domain::{
    Event, EventType, Goal, GoalStatus, GoalWithSteps, Priority, Role, SessionRecord, Step,
    StepStatus, StoredMessage, UserProfile,
};

/// Draft for goal creation, accumulated by the clarification flow.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GoalDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_commitment: Option<i64>,
}

/// A step to insert. `order = None` appends at `max(order) + 1`.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub title: String,
    pub order: Option<i32>,
    pub estimated_hours: Option<f64>,
    pub planned_date: Option<NaiveDate>,
    pub planned_time: Option<NaiveTime>,
}

/// Partial goal update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct GoalPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<GoalStatus>,
    pub target_date: Option<Option<NaiveDate>>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

/// Partial step update (status changes go through `update_step_status`).
#[derive(Debug, Clone, Default)]
pub struct StepPatch {
    pub title: Option<String>,
    pub planned_date: Option<Option<NaiveDate>>,
    pub planned_time: Option<Option<NaiveTime>>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub duration_minutes: i64,
    pub repeat: Option<String>,
    pub notes: Option<String>,
    pub event_type: EventType,
    pub linked_step_id: Option<i64>,
    pub linked_goal_id: Option<i64>,
    pub reminder_minutes_before: i64,
    pub reminder_enabled: bool,
}

impl NewEvent {
    pub fn user_event(title: impl Into<String>, date: NaiveDate, time: Option<NaiveTime>) -> Self {
        Self {
            title: title.into(),
            date,
            time,
            duration_minutes: 60,
            repeat: None,
            notes: None,
            event_type: EventType::User,
            linked_step_id: None,
            linked_goal_id: None,
            reminder_minutes_before: 15,
            reminder_enabled: true,
        }
    }
}

/// Partial event update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<Option<NaiveTime>>,
    pub duration_minutes: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub title_like: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub time_from: Option<NaiveTime>,
    pub time_to: Option<NaiveTime>,
    pub limit: i64,
}

/// One placement decision made by the auto-scheduler.
#[derive(Debug, Clone)]
pub struct StepPlacement {
    pub step_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: String,
    pub role: Role,
    pub text: String,
    pub intent: Option<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch the profile, creating it with defaults on first contact.
    async fn get_or_create_user(
        &self,
        user_id: &str,
        chat_id: i64,
        default_timezone: &str,
    ) -> anyhow::Result<UserProfile>;

    async fn get_user(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>>;

    async fn set_timezone(&self, user_id: &str, timezone: &str) -> anyhow::Result<()>;

    /// All profiles; notification jobs filter by their own toggle.
    async fn all_users(&self) -> anyhow::Result<Vec<UserProfile>>;
}

#[async_trait]
pub trait GoalStore: Send + Sync {
    /// Insert a goal together with its generated steps in one transaction.
    async fn create_goal_with_steps(
        &self,
        user_id: &str,
        draft: &GoalDraft,
        steps: &[NewStep],
    ) -> anyhow::Result<GoalWithSteps>;

    async fn get_goal(&self, user_id: &str, goal_id: i64) -> anyhow::Result<Option<Goal>>;

    async fn get_goal_with_steps(
        &self,
        user_id: &str,
        goal_id: i64,
    ) -> anyhow::Result<Option<GoalWithSteps>>;

    /// Sorted: active < paused < completed, then target_date (nulls last),
    /// then goal id.
    async fn list_goals(
        &self,
        user_id: &str,
        status: Option<GoalStatus>,
    ) -> anyhow::Result<Vec<Goal>>;

    async fn update_goal(
        &self,
        user_id: &str,
        goal_id: i64,
        patch: &GoalPatch,
    ) -> anyhow::Result<Option<Goal>>;

    /// Cascade: steps and their linked events go in the same transaction.
    async fn delete_goal(&self, user_id: &str, goal_id: i64) -> anyhow::Result<bool>;

    /// Append or insert a step; when `planned_date` is set, a linked
    /// `goal_step` event is created in the same transaction.
    async fn add_step(&self, user_id: &str, goal_id: i64, step: &NewStep)
        -> anyhow::Result<Step>;

    async fn get_step(&self, user_id: &str, step_id: i64) -> anyhow::Result<Option<Step>>;

    /// Transition status, stamp/clear `completed_at`, recompute parent
    /// progress and auto-complete/reactivate the goal — one transaction.
    /// Returns the updated step and its parent goal.
    async fn update_step_status(
        &self,
        user_id: &str,
        step_id: i64,
        status: StepStatus,
    ) -> anyhow::Result<Option<(Step, Goal)>>;

    async fn update_step(
        &self,
        user_id: &str,
        step_id: i64,
        patch: &StepPatch,
    ) -> anyhow::Result<Option<Step>>;

    /// Delete the step and any linked event, then renumber the remaining
    /// steps so orders stay a permutation of `1..=N` — one transaction.
    async fn delete_step(&self, user_id: &str, step_id: i64) -> anyhow::Result<bool>;

    /// Persist the scheduler's placements: create linked events, stamp the
    /// steps, set `is_scheduled` — one transaction, all-or-nothing.
    async fn attach_schedule(
        &self,
        user_id: &str,
        goal_id: i64,
        placements: &[StepPlacement],
    ) -> anyhow::Result<Vec<Event>>;

    /// Undo scheduling: drop linked events, clear planned fields, reset
    /// `is_scheduled`.
    async fn clear_schedule(&self, user_id: &str, goal_id: i64) -> anyhow::Result<()>;

    async fn active_goals(&self, user_id: &str) -> anyhow::Result<Vec<Goal>>;

    /// Active goals whose `target_date` is one of `dates` (the deadline
    /// job's {7,3,1,0}-days-out probe, computed in the user's zone).
    async fn active_goals_with_target_dates(
        &self,
        user_id: &str,
        dates: &[NaiveDate],
    ) -> anyhow::Result<Vec<Goal>>;

    /// Unfinished steps of active goals planned strictly before `before`,
    /// joined with their goals, ordered by goal then step order.
    async fn overdue_steps(
        &self,
        user_id: &str,
        before: NaiveDate,
    ) -> anyhow::Result<Vec<(Step, Goal)>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, user_id: &str, event: &NewEvent) -> anyhow::Result<Event>;

    async fn get_event(&self, user_id: &str, event_id: i64) -> anyhow::Result<Option<Event>>;

    /// Ordered ascending by `(date, time NULLS LAST, id)`.
    async fn search_events(
        &self,
        user_id: &str,
        filter: &EventFilter,
    ) -> anyhow::Result<Vec<Event>>;

    async fn update_event(
        &self,
        user_id: &str,
        event_id: i64,
        patch: &EventPatch,
    ) -> anyhow::Result<Option<Event>>;

    /// Deleting an event owned by a step clears the step's link in the same
    /// transaction.
    async fn delete_event(&self, user_id: &str, event_id: i64) -> anyhow::Result<bool>;

    /// Events within `[from, to]` inclusive, same ordering as search.
    async fn events_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<Event>>;

    /// Timed events with reminders enabled on or after `from` — the event
    /// reminder job's scan set.
    async fn reminder_candidates(
        &self,
        user_id: &str,
        from: NaiveDate,
    ) -> anyhow::Result<Vec<Event>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append and trim the per-user window to the retention cap.
    async fn append_message(&self, msg: &NewMessage) -> anyhow::Result<()>;

    /// Most recent messages, oldest first.
    async fn recent_messages(
        &self,
        user_id: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<StoredMessage>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the singleton session row, creating an idle one if missing.
    async fn get_session(&self, user_id: &str) -> anyhow::Result<SessionRecord>;

    async fn set_session(
        &self,
        user_id: &str,
        state: &str,
        context: &serde_json::Value,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomically claim a `(user, job, key, local fire date)` tuple.
    /// Returns false when the tuple was already claimed today.
    async fn try_claim(
        &self,
        user_id: &str,
        job_kind: &str,
        entity_key: &str,
        fire_date: NaiveDate,
    ) -> anyhow::Result<bool>;
}

/// Facade over every store concern, for trait objects.
pub trait Store:
    UserStore + GoalStore + EventStore + ConversationStore + SessionStore + DedupStore
{
}

impl<T> Store for T where
    T: UserStore + GoalStore + EventStore + ConversationStore + SessionStore + DedupStore
{
}

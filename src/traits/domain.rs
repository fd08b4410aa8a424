//! Domain entities. Every entity is scoped to a `user_id` partition; the
//! Step↔Event link is a pair of typed ids kept symmetric at the transaction
//! boundary, never an in-memory object graph.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub chat_id: i64,
    /// IANA zone name, validated on write.
    pub timezone: String,
    pub notifications_enabled: bool,
    pub event_reminders_enabled: bool,
    pub goal_deadline_warnings_enabled: bool,
    pub step_reminders_enabled: bool,
    pub motivational_messages_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone
            .parse()
            .unwrap_or(chrono_tz::Europe::Moscow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Paused,
    Completed,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Paused => "paused",
            GoalStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(GoalStatus::Active),
            "paused" => Some(GoalStatus::Paused),
            "completed" => Some(GoalStatus::Completed),
            _ => None,
        }
    }

    /// Sort rank for goal lists: active before paused before completed.
    pub fn rank(&self) -> u8 {
        match self {
            GoalStatus::Active => 0,
            GoalStatus::Paused => 1,
            GoalStatus::Completed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "in_progress" => Some(StepStatus::InProgress),
            "completed" => Some(StepStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    User,
    GoalStep,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::User => "user",
            EventType::GoalStep => "goal_step",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(EventType::User),
            "goal_step" => Some(EventType::GoalStep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: GoalStatus,
    /// Derived: `round(100 * completed / total)`, 0 when there are no steps.
    pub progress_percent: i32,
    pub target_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub priority: Priority,
    pub is_scheduled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: i64,
    pub goal_id: i64,
    pub title: String,
    /// 1-based position, a permutation of `1..=N` within the goal.
    pub order: i32,
    pub status: StepStatus,
    pub estimated_hours: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub planned_date: Option<NaiveDate>,
    pub planned_time: Option<NaiveTime>,
    pub duration_minutes: Option<i64>,
    pub linked_event_id: Option<i64>,
}

impl Step {
    pub fn is_scheduled(&self) -> bool {
        self.planned_date.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalWithSteps {
    pub goal: Goal,
    /// Ordered by `order` ascending.
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub date: NaiveDate,
    /// `None` means all-day.
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Recognized intent tag, assistant turns only.
    pub intent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    /// Dialog state tag; `dialog::DialogState` round-trips through this.
    pub state: String,
    /// Opaque context bag owned by the dialog machine.
    pub context: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [GoalStatus::Active, GoalStatus::Paused, GoalStatus::Completed] {
            assert_eq!(GoalStatus::parse(s.as_str()), Some(s));
        }
        for s in [StepStatus::Pending, StepStatus::InProgress, StepStatus::Completed] {
            assert_eq!(StepStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(GoalStatus::parse("cancelled"), None);
        assert_eq!(StepStatus::parse("done"), None);
    }

    #[test]
    fn goal_status_ranks_active_first() {
        assert!(GoalStatus::Active.rank() < GoalStatus::Paused.rank());
        assert!(GoalStatus::Paused.rank() < GoalStatus::Completed.rank());
    }

    #[test]
    fn unknown_timezone_falls_back_to_moscow() {
        let user = UserProfile {
            user_id: "u1".into(),
            chat_id: 1,
            timezone: "Not/AZone".into(),
            notifications_enabled: true,
            event_reminders_enabled: true,
            goal_deadline_warnings_enabled: true,
            step_reminders_enabled: true,
            motivational_messages_enabled: true,
            created_at: Utc::now(),
        };
        assert_eq!(user.tz(), chrono_tz::Europe::Moscow);
    }
}

//! Dialog state machine (component D): the typed state enum, the callback
//! token grammar, the SMART gate for goal creation, and the staleness rule.
//!
//! The machine itself is pure — the orchestrator owns persistence and drives
//! transitions through these pieces.

use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::{GoalDraft, SessionRecord};
use crate::utils::parse_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalField {
    Title,
    Description,
    Deadline,
    Category,
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Title,
    Date,
    Time,
    Duration,
    Notes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepField {
    Title,
    Date,
    Time,
}

/// Exactly one per user; round-trips through the session store as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogState {
    #[default]
    Idle,
    GoalClarification,
    GoalEdit(GoalField),
    EventEdit(EventField),
    StepEdit(StepField),
    SchedulePrefsDays,
    SchedulePrefsTime,
}

impl DialogState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogState::Idle => "idle",
            DialogState::GoalClarification => "goal_clarification",
            DialogState::GoalEdit(GoalField::Title) => "goal_edit_title",
            DialogState::GoalEdit(GoalField::Description) => "goal_edit_description",
            DialogState::GoalEdit(GoalField::Deadline) => "goal_edit_deadline",
            DialogState::GoalEdit(GoalField::Category) => "goal_edit_category",
            DialogState::GoalEdit(GoalField::Priority) => "goal_edit_priority",
            DialogState::EventEdit(EventField::Title) => "event_edit_title",
            DialogState::EventEdit(EventField::Date) => "event_edit_date",
            DialogState::EventEdit(EventField::Time) => "event_edit_time",
            DialogState::EventEdit(EventField::Duration) => "event_edit_duration",
            DialogState::EventEdit(EventField::Notes) => "event_edit_notes",
            DialogState::StepEdit(StepField::Title) => "step_edit_title",
            DialogState::StepEdit(StepField::Date) => "step_edit_date",
            DialogState::StepEdit(StepField::Time) => "step_edit_time",
            DialogState::SchedulePrefsDays => "schedule_prefs_days",
            DialogState::SchedulePrefsTime => "schedule_prefs_time",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let state = match s {
            "idle" => DialogState::Idle,
            "goal_clarification" => DialogState::GoalClarification,
            "goal_edit_title" => DialogState::GoalEdit(GoalField::Title),
            "goal_edit_description" => DialogState::GoalEdit(GoalField::Description),
            "goal_edit_deadline" => DialogState::GoalEdit(GoalField::Deadline),
            "goal_edit_category" => DialogState::GoalEdit(GoalField::Category),
            "goal_edit_priority" => DialogState::GoalEdit(GoalField::Priority),
            "event_edit_title" => DialogState::EventEdit(EventField::Title),
            "event_edit_date" => DialogState::EventEdit(EventField::Date),
            "event_edit_time" => DialogState::EventEdit(EventField::Time),
            "event_edit_duration" => DialogState::EventEdit(EventField::Duration),
            "event_edit_notes" => DialogState::EventEdit(EventField::Notes),
            "step_edit_title" => DialogState::StepEdit(StepField::Title),
            "step_edit_date" => DialogState::StepEdit(StepField::Date),
            "step_edit_time" => DialogState::StepEdit(StepField::Time),
            "schedule_prefs_days" => DialogState::SchedulePrefsDays,
            "schedule_prefs_time" => DialogState::SchedulePrefsTime,
            _ => return None,
        };
        Some(state)
    }

    /// States whose next free-text message is consumed by the flow instead
    /// of going through the intent parser.
    pub fn consumes_free_text(&self) -> bool {
        matches!(
            self,
            DialogState::GoalClarification
                | DialogState::GoalEdit(_)
                | DialogState::EventEdit(_)
                | DialogState::StepEdit(_)
                | DialogState::SchedulePrefsTime
        )
    }
}

/// A non-idle state older than the dialog timeout silently resets to idle
/// before the next message is handled.
pub fn is_stale(session: &SessionRecord, timeout_s: u64) -> bool {
    session.state != "idle"
        && (Utc::now() - session.updated_at).num_seconds() >= timeout_s as i64
}

/// The opaque `state_context` bag, typed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DialogContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<GoalDraft>,
    /// Goal being scheduled or edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<i64>,
    /// Entity id captured by an `edit:` callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_id: Option<i64>,
    /// Selected weekdays, 0 = Monday .. 6 = Sunday.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<u8>,
    /// Preferred start time as `HH:MM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_time: Option<String>,
}

impl DialogContext {
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn toggle_day(&mut self, day: u8) {
        if let Some(pos) = self.days.iter().position(|&d| d == day) {
            self.days.remove(pos);
        } else {
            self.days.push(day);
            self.days.sort_unstable();
        }
    }
}

/// Parsed callback token. The grammar is exhaustive; anything else is
/// rejected before reaching a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    EditGoal { field: GoalField, id: i64 },
    EditEvent { field: EventField, id: i64 },
    EditStep { field: StepField, id: i64 },
    DayPref(u8),
    DayPrefDone,
    TimePref(NaiveTime),
    TimePrefDone,
    Confirm { op: String, id: i64 },
    Cancel,
}

impl Callback {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "cancel" => return Some(Callback::Cancel),
            "day_pref_done" => return Some(Callback::DayPrefDone),
            "time_pref_done" => return Some(Callback::TimePrefDone),
            _ => {}
        }

        if let Some(rest) = data.strip_prefix("day_pref:") {
            let day: u8 = rest.parse().ok()?;
            if day > 6 {
                return None;
            }
            return Some(Callback::DayPref(day));
        }

        if let Some(rest) = data.strip_prefix("time_pref:") {
            let time = match rest {
                "morning" => parse_time("09:00")?,
                "afternoon" => parse_time("14:00")?,
                "evening" => parse_time("18:00")?,
                explicit => parse_time(explicit)?,
            };
            return Some(Callback::TimePref(time));
        }

        if let Some(rest) = data.strip_prefix("confirm:") {
            let (op, id) = rest.split_once(':')?;
            if op.is_empty() {
                return None;
            }
            return Some(Callback::Confirm {
                op: op.to_string(),
                id: id.parse().ok()?,
            });
        }

        if let Some(rest) = data.strip_prefix("edit:") {
            let mut parts = rest.splitn(3, ':');
            let entity = parts.next()?;
            let field = parts.next()?;
            let id: i64 = parts.next()?.parse().ok()?;
            return match entity {
                "goal" => {
                    let field = match field {
                        "title" => GoalField::Title,
                        "description" => GoalField::Description,
                        "deadline" => GoalField::Deadline,
                        "category" => GoalField::Category,
                        "priority" => GoalField::Priority,
                        _ => return None,
                    };
                    Some(Callback::EditGoal { field, id })
                }
                "event" => {
                    let field = match field {
                        "title" => EventField::Title,
                        "date" => EventField::Date,
                        "time" => EventField::Time,
                        "duration" => EventField::Duration,
                        "notes" => EventField::Notes,
                        _ => return None,
                    };
                    Some(Callback::EditEvent { field, id })
                }
                "step" => {
                    let field = match field {
                        "title" => StepField::Title,
                        "date" => StepField::Date,
                        "time" => StepField::Time,
                        _ => return None,
                    };
                    Some(Callback::EditStep { field, id })
                }
                _ => None,
            };
        }

        None
    }
}

// ---- SMART validation ----

/// Why a goal draft failed the SMART gate; each issue maps to a targeted
/// follow-up question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartIssue {
    TitleTooVague,
    NoTimeframe,
    PureQuestion,
}

impl SmartIssue {
    pub fn question(&self) -> &'static str {
        match self {
            SmartIssue::TitleTooVague => {
                "Сформулируй цель конкретнее: что именно ты хочешь сделать?"
            }
            SmartIssue::NoTimeframe => {
                "К какому сроку ты хочешь достичь цели? Назови дату или период (например, «за 3 месяца»)."
            }
            SmartIssue::PureQuestion => {
                "Это звучит как вопрос, а не цель. Опиши, чего ты хочешь достичь."
            }
        }
    }
}

const STOPWORDS: &[&str] = &[
    "хочу", "надо", "нужно", "очень", "чтобы", "быть", "стать", "буду", "меня", "мне", "свой",
    "своя", "это", "как", "для", "want", "need", "very", "this", "that", "will",
];

/// Specific / Measurable / Timed gate for automatic decomposition.
pub fn smart_check(draft: &GoalDraft) -> Result<(), SmartIssue> {
    let title = draft.title.trim();
    let combined = match &draft.description {
        Some(d) => format!("{} {}", title, d),
        None => title.to_string(),
    };

    if combined.trim().ends_with('?') {
        return Err(SmartIssue::PureQuestion);
    }

    if title.chars().count() < 8 || !has_verb_like_token(title) {
        return Err(SmartIssue::TitleTooVague);
    }

    if draft.target_date.is_none() && !mentions_duration(&combined) {
        return Err(SmartIssue::NoTimeframe);
    }

    Ok(())
}

fn has_verb_like_token(title: &str) -> bool {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .any(|t| t.chars().count() >= 4 && !STOPWORDS.contains(&t.as_str()))
}

fn mentions_duration(text: &str) -> bool {
    static DURATION_RE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(
            r"(?i)(\d+\s*(дн|недел|месяц|год|лет|час|мин|day|week|month|year|hour))|за\s+(день|неделю|месяц|год)|каждый\s+день|каждую\s+неделю",
        )
        .expect("duration regex")
    });
    DURATION_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_date;

    #[test]
    fn state_round_trips_through_strings() {
        let states = [
            DialogState::Idle,
            DialogState::GoalClarification,
            DialogState::GoalEdit(GoalField::Deadline),
            DialogState::EventEdit(EventField::Duration),
            DialogState::StepEdit(StepField::Time),
            DialogState::SchedulePrefsDays,
            DialogState::SchedulePrefsTime,
        ];
        for state in states {
            assert_eq!(DialogState::parse(state.as_str()), Some(state));
        }
        assert_eq!(DialogState::parse("goal_edit_owner"), None);
    }

    #[test]
    fn callback_grammar_is_exhaustive() {
        assert_eq!(Callback::parse("cancel"), Some(Callback::Cancel));
        assert_eq!(Callback::parse("day_pref:0"), Some(Callback::DayPref(0)));
        assert_eq!(Callback::parse("day_pref:6"), Some(Callback::DayPref(6)));
        assert_eq!(Callback::parse("day_pref:7"), None);
        assert_eq!(Callback::parse("day_pref_done"), Some(Callback::DayPrefDone));
        assert_eq!(
            Callback::parse("time_pref:evening"),
            Some(Callback::TimePref(parse_time("18:00").unwrap()))
        );
        assert_eq!(
            Callback::parse("time_pref:07:45"),
            Some(Callback::TimePref(parse_time("07:45").unwrap()))
        );
        assert_eq!(Callback::parse("time_pref:later"), None);
        assert_eq!(
            Callback::parse("edit:goal:title:12"),
            Some(Callback::EditGoal {
                field: GoalField::Title,
                id: 12
            })
        );
        assert_eq!(
            Callback::parse("edit:event:duration:3"),
            Some(Callback::EditEvent {
                field: EventField::Duration,
                id: 3
            })
        );
        assert_eq!(
            Callback::parse("edit:step:date:9"),
            Some(Callback::EditStep {
                field: StepField::Date,
                id: 9
            })
        );
        assert_eq!(Callback::parse("edit:cart:item:1"), None);
        assert_eq!(
            Callback::parse("confirm:delete_goal:4"),
            Some(Callback::Confirm {
                op: "delete_goal".into(),
                id: 4
            })
        );
        assert_eq!(Callback::parse("restart"), None);
        assert_eq!(Callback::parse(""), None);
    }

    #[test]
    fn day_toggle_flips_membership() {
        let mut ctx = DialogContext::default();
        ctx.toggle_day(2);
        ctx.toggle_day(0);
        assert_eq!(ctx.days, vec![0, 2]);
        ctx.toggle_day(2);
        assert_eq!(ctx.days, vec![0]);
    }

    #[test]
    fn context_round_trips_through_json() {
        let ctx = DialogContext {
            draft: Some(GoalDraft {
                title: "Выучить испанский".into(),
                target_date: parse_date("2026-11-01"),
                ..Default::default()
            }),
            goal_id: Some(7),
            edit_id: None,
            days: vec![0, 2, 4],
            preferred_time: Some("18:00".into()),
        };
        let value = ctx.to_value();
        assert_eq!(DialogContext::from_value(&value), ctx);
    }

    #[test]
    fn smart_rejects_vague_short_and_questions() {
        let vague = GoalDraft {
            title: "успех".into(),
            ..Default::default()
        };
        assert_eq!(smart_check(&vague), Err(SmartIssue::TitleTooVague));

        let question = GoalDraft {
            title: "Как выучить испанский?".into(),
            ..Default::default()
        };
        assert_eq!(smart_check(&question), Err(SmartIssue::PureQuestion));

        let timeless = GoalDraft {
            title: "Выучить испанский язык".into(),
            ..Default::default()
        };
        assert_eq!(smart_check(&timeless), Err(SmartIssue::NoTimeframe));
    }

    #[test]
    fn smart_passes_with_deadline_or_duration_mention() {
        let dated = GoalDraft {
            title: "Выучить испанский язык".into(),
            target_date: parse_date("2026-11-01"),
            ..Default::default()
        };
        assert_eq!(smart_check(&dated), Ok(()));

        let duration = GoalDraft {
            title: "Выучить испанский язык".into(),
            description: Some("за 3 месяца, 3 часа в неделю".into()),
            ..Default::default()
        };
        assert_eq!(smart_check(&duration), Ok(()));
    }

    #[test]
    fn stale_detection_honors_timeout_and_idle() {
        let fresh = SessionRecord {
            user_id: "u1".into(),
            state: "goal_edit_title".into(),
            context: serde_json::json!({}),
            updated_at: Utc::now(),
        };
        assert!(!is_stale(&fresh, 1800));

        let old = SessionRecord {
            updated_at: Utc::now() - chrono::Duration::minutes(31),
            ..fresh.clone()
        };
        assert!(is_stale(&old, 1800));

        let idle_old = SessionRecord {
            state: "idle".into(),
            ..old
        };
        assert!(!is_stale(&idle_old, 1800));
    }
}

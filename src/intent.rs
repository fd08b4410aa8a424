//! The closed intent set and the one place where dynamic model JSON becomes
//! typed data. Everything downstream is a total function over `Intent`.
//!
//! Parsing is two-staged: `RawIntent` is the serde image of the wire JSON
//! (string dates, flattened target fields); `validate` turns it into the
//! typed `Intent` after shape and semantic checks against the store and the
//! caller's result sets. The parser performs no side effects.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::resultset::{ResolveError, ResultKind, ResultSetCache};
use crate::traits::store_prelude::*;
use crate::traits::{GoalStatus, ModelAdapter, ModelError, ModelRequest, Priority, StepStatus, Store};
use crate::utils::{parse_date, parse_time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutateOp {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// Entity addressing: a direct id, or a 1-based ordinal into a prior result
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRef {
    Id(i64),
    Ordinal { set_id: Uuid, ordinal: usize },
}

/// Wire image of the model's JSON. Field names are the fixed keys of the
/// protocol; unknown extra keys are tolerated, a missing or unknown `intent`
/// tag is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent")]
pub enum RawIntent {
    #[serde(rename = "small_talk")]
    SmallTalk { reply_hint: String },

    #[serde(rename = "event.search")]
    EventSearch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title_like: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_to: Option<String>,
    },

    #[serde(rename = "event.mutate")]
    EventMutate {
        op: MutateOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_minutes: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ordinal: Option<u64>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        dry_run: bool,
    },

    #[serde(rename = "goal.search")]
    GoalSearch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    #[serde(rename = "goal.create")]
    GoalCreate {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_level: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_commitment: Option<i64>,
    },

    #[serde(rename = "goal.delete")]
    GoalDelete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        goal_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ordinal: Option<u64>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        dry_run: bool,
    },

    #[serde(rename = "goal.query")]
    GoalQuery {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        goal_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ordinal: Option<u64>,
    },

    #[serde(rename = "goal.update_step")]
    GoalUpdateStep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ordinal: Option<u64>,
        new_status: String,
    },

    #[serde(rename = "goal.add_step")]
    GoalAddStep {
        goal_id: i64,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        planned_date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        planned_time: Option<String>,
    },

    #[serde(rename = "goal.delete_step")]
    GoalDeleteStep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ordinal: Option<u64>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        dry_run: bool,
    },

    #[serde(rename = "product.search")]
    ProductSearch {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        price_max: Option<f64>,
    },
}

/// Validated, typed intent. Target refs stay symbolic: the dispatcher
/// resolves ordinals at execution time so follow-ups see the same list the
/// user saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SmallTalk {
        reply_hint: String,
    },
    EventSearch {
        title_like: Option<String>,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
        time_from: Option<NaiveTime>,
        time_to: Option<NaiveTime>,
    },
    EventMutate {
        op: MutateOp,
        title: Option<String>,
        date: Option<NaiveDate>,
        time: Option<NaiveTime>,
        duration_minutes: Option<i64>,
        target: Option<TargetRef>,
        dry_run: bool,
    },
    GoalSearch {
        status: Option<GoalStatus>,
    },
    GoalCreate {
        title: String,
        description: Option<String>,
        target_date: Option<NaiveDate>,
        category: Option<String>,
        priority: Option<Priority>,
        user_level: Option<UserLevel>,
        time_commitment: Option<i64>,
    },
    GoalDelete {
        target: TargetRef,
        dry_run: bool,
    },
    GoalQuery {
        target: TargetRef,
    },
    GoalUpdateStep {
        target: TargetRef,
        new_status: StepStatus,
    },
    GoalAddStep {
        goal_id: i64,
        title: String,
        order: Option<i32>,
        planned_date: Option<NaiveDate>,
        planned_time: Option<NaiveTime>,
    },
    GoalDeleteStep {
        target: TargetRef,
        dry_run: bool,
    },
    ProductSearch {
        query: String,
        price_max: Option<f64>,
    },
}

impl Intent {
    /// Wire tag, recorded alongside assistant turns.
    pub fn tag(&self) -> &'static str {
        match self {
            Intent::SmallTalk { .. } => "small_talk",
            Intent::EventSearch { .. } => "event.search",
            Intent::EventMutate { .. } => "event.mutate",
            Intent::GoalSearch { .. } => "goal.search",
            Intent::GoalCreate { .. } => "goal.create",
            Intent::GoalDelete { .. } => "goal.delete",
            Intent::GoalQuery { .. } => "goal.query",
            Intent::GoalUpdateStep { .. } => "goal.update_step",
            Intent::GoalAddStep { .. } => "goal.add_step",
            Intent::GoalDeleteStep { .. } => "goal.delete_step",
            Intent::ProductSearch { .. } => "product.search",
        }
    }

    /// Project back onto the wire shape. `validate(serialize(i)) == i` for
    /// every valid intent.
    pub fn to_raw(&self) -> RawIntent {
        fn target_fields(t: &Option<TargetRef>) -> (Option<i64>, Option<Uuid>, Option<u64>) {
            match t {
                Some(TargetRef::Id(id)) => (Some(*id), None, None),
                Some(TargetRef::Ordinal { set_id, ordinal }) => {
                    (None, Some(*set_id), Some(*ordinal as u64))
                }
                None => (None, None, None),
            }
        }

        match self {
            Intent::SmallTalk { reply_hint } => RawIntent::SmallTalk {
                reply_hint: reply_hint.clone(),
            },
            Intent::EventSearch {
                title_like,
                date_from,
                date_to,
                time_from,
                time_to,
            } => RawIntent::EventSearch {
                title_like: title_like.clone(),
                date_from: date_from.map(|d| d.format("%Y-%m-%d").to_string()),
                date_to: date_to.map(|d| d.format("%Y-%m-%d").to_string()),
                time_from: time_from.map(|t| t.format("%H:%M").to_string()),
                time_to: time_to.map(|t| t.format("%H:%M").to_string()),
            },
            Intent::EventMutate {
                op,
                title,
                date,
                time,
                duration_minutes,
                target,
                dry_run,
            } => {
                let (event_id, set_id, ordinal) = target_fields(target);
                RawIntent::EventMutate {
                    op: *op,
                    title: title.clone(),
                    date: date.map(|d| d.format("%Y-%m-%d").to_string()),
                    time: time.map(|t| t.format("%H:%M").to_string()),
                    duration_minutes: *duration_minutes,
                    event_id,
                    set_id,
                    ordinal,
                    dry_run: *dry_run,
                }
            }
            Intent::GoalSearch { status } => RawIntent::GoalSearch {
                status: status.map(|s| s.as_str().to_string()),
            },
            Intent::GoalCreate {
                title,
                description,
                target_date,
                category,
                priority,
                user_level,
                time_commitment,
            } => RawIntent::GoalCreate {
                title: title.clone(),
                description: description.clone(),
                target_date: target_date.map(|d| d.format("%Y-%m-%d").to_string()),
                category: category.clone(),
                priority: priority.map(|p| p.as_str().to_string()),
                user_level: user_level.map(|l| {
                    match l {
                        UserLevel::Beginner => "beginner",
                        UserLevel::Intermediate => "intermediate",
                        UserLevel::Advanced => "advanced",
                    }
                    .to_string()
                }),
                time_commitment: *time_commitment,
            },
            Intent::GoalDelete { target, dry_run } => {
                let (goal_id, set_id, ordinal) = target_fields(&Some(*target));
                RawIntent::GoalDelete {
                    goal_id,
                    set_id,
                    ordinal,
                    dry_run: *dry_run,
                }
            }
            Intent::GoalQuery { target } => {
                let (goal_id, set_id, ordinal) = target_fields(&Some(*target));
                RawIntent::GoalQuery {
                    goal_id,
                    set_id,
                    ordinal,
                }
            }
            Intent::GoalUpdateStep { target, new_status } => {
                let (step_id, set_id, ordinal) = target_fields(&Some(*target));
                RawIntent::GoalUpdateStep {
                    step_id,
                    set_id,
                    ordinal,
                    new_status: new_status.as_str().to_string(),
                }
            }
            Intent::GoalAddStep {
                goal_id,
                title,
                order,
                planned_date,
                planned_time,
            } => RawIntent::GoalAddStep {
                goal_id: *goal_id,
                title: title.clone(),
                order: order.map(|o| o as i64),
                planned_date: planned_date.map(|d| d.format("%Y-%m-%d").to_string()),
                planned_time: planned_time.map(|t| t.format("%H:%M").to_string()),
            },
            Intent::GoalDeleteStep { target, dry_run } => {
                let (step_id, set_id, ordinal) = target_fields(&Some(*target));
                RawIntent::GoalDeleteStep {
                    step_id,
                    set_id,
                    ordinal,
                    dry_run: *dry_run,
                }
            }
            Intent::ProductSearch { query, price_max } => RawIntent::ProductSearch {
                query: query.clone(),
                price_max: *price_max,
            },
        }
    }
}

/// Pull a JSON object out of model text: strip code fences and any prose
/// around the outermost braces.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Call the model and parse its answer into a `RawIntent`. One strict-JSON
/// retry on a parse miss; timeouts and double misses fail the pipeline.
pub async fn parse_intent(
    model: &dyn ModelAdapter,
    system_prompt: &str,
    utterance: &str,
    temperature: f32,
) -> Result<RawIntent, CoreError> {
    let request = ModelRequest {
        system: system_prompt.to_string(),
        user: utterance.to_string(),
        temperature,
    };

    let first = call_model(model, &request).await?;
    if let Some(raw) = try_parse(&first) {
        return Ok(raw);
    }
    tracing::warn!("intent parse miss, retrying with strict reminder");

    let strict = ModelRequest {
        system: format!(
            "{}\n\nОтветь ТОЛЬКО валидным JSON-объектом. Ни одного символа вне JSON.",
            system_prompt
        ),
        user: utterance.to_string(),
        temperature,
    };
    let second = call_model(model, &strict).await?;
    try_parse(&second).ok_or(CoreError::IntentParse)
}

async fn call_model(
    model: &dyn ModelAdapter,
    request: &ModelRequest,
) -> Result<String, CoreError> {
    model.complete(request).await.map_err(|e| match e {
        ModelError::Timeout => CoreError::IntentTimeout,
        ModelError::Transport(err) => {
            tracing::warn!("model transport failure: {:#}", err);
            CoreError::IntentParse
        }
    })
}

fn try_parse(text: &str) -> Option<RawIntent> {
    let json = extract_json(text)?;
    serde_json::from_str(json).ok()
}

/// Shape and semantic validation against the store and result sets.
pub async fn validate(
    raw: RawIntent,
    store: &dyn Store,
    resultsets: &ResultSetCache,
    user_id: &str,
) -> Result<Intent, CoreError> {
    match raw {
        RawIntent::SmallTalk { reply_hint } => Ok(Intent::SmallTalk { reply_hint }),

        RawIntent::EventSearch {
            title_like,
            date_from,
            date_to,
            time_from,
            time_to,
        } => {
            let date_from = opt_date(date_from, "date_from")?;
            let date_to = opt_date(date_to, "date_to")?;
            let time_from = opt_time(time_from, "time_from")?;
            let time_to = opt_time(time_to, "time_to")?;
            if let (Some(from), Some(to)) = (date_from, date_to) {
                if from > to {
                    return Err(CoreError::IntentInvalid("date_from > date_to".into()));
                }
            }
            if let (Some(from), Some(to)) = (time_from, time_to) {
                if from > to {
                    return Err(CoreError::IntentInvalid("time_from > time_to".into()));
                }
            }
            Ok(Intent::EventSearch {
                title_like,
                date_from,
                date_to,
                time_from,
                time_to,
            })
        }

        RawIntent::EventMutate {
            op,
            title,
            date,
            time,
            duration_minutes,
            event_id,
            set_id,
            ordinal,
            dry_run,
        } => {
            let date = opt_date(date, "date")?;
            let time = opt_time(time, "time")?;
            if let Some(d) = duration_minutes {
                if d <= 0 {
                    return Err(CoreError::IntentInvalid("duration_minutes must be positive".into()));
                }
            }
            let target =
                opt_target(event_id, set_id, ordinal, ResultKind::Events, store, resultsets, user_id)
                    .await?;
            match op {
                MutateOp::Create => {
                    if title.as_deref().map(str::trim).unwrap_or("").is_empty() {
                        return Err(CoreError::IntentInvalid("create requires title".into()));
                    }
                    if date.is_none() {
                        return Err(CoreError::IntentInvalid("create requires date".into()));
                    }
                }
                MutateOp::Update => {
                    if target.is_none() {
                        return Err(CoreError::IntentInvalid("update requires target".into()));
                    }
                    if title.is_none() && date.is_none() && time.is_none() && duration_minutes.is_none()
                    {
                        return Err(CoreError::IntentInvalid("update has no fields to change".into()));
                    }
                }
                MutateOp::Delete => {
                    if target.is_none() {
                        return Err(CoreError::IntentInvalid("delete requires target".into()));
                    }
                }
            }
            Ok(Intent::EventMutate {
                op,
                title,
                date,
                time,
                duration_minutes,
                target,
                dry_run,
            })
        }

        RawIntent::GoalSearch { status } => {
            let status = match status {
                Some(raw) => Some(
                    GoalStatus::parse(&raw)
                        .ok_or_else(|| CoreError::IntentInvalid(format!("bad status '{}'", raw)))?,
                ),
                None => None,
            };
            Ok(Intent::GoalSearch { status })
        }

        RawIntent::GoalCreate {
            title,
            description,
            target_date,
            category,
            priority,
            user_level,
            time_commitment,
        } => {
            let title = title.trim().to_string();
            if title.chars().count() < 3 || title.chars().count() > 200 {
                return Err(CoreError::IntentInvalid("title must be 3-200 chars".into()));
            }
            if let Some(desc) = &description {
                if desc.chars().count() > 1000 {
                    return Err(CoreError::IntentInvalid("description too long".into()));
                }
            }
            let target_date = opt_date(target_date, "target_date")?;
            let priority = match priority {
                Some(raw) => Some(
                    Priority::parse(&raw)
                        .ok_or_else(|| CoreError::IntentInvalid(format!("bad priority '{}'", raw)))?,
                ),
                None => None,
            };
            let user_level = match user_level.as_deref() {
                None => None,
                Some("beginner") => Some(UserLevel::Beginner),
                Some("intermediate") => Some(UserLevel::Intermediate),
                Some("advanced") => Some(UserLevel::Advanced),
                Some(other) => {
                    return Err(CoreError::IntentInvalid(format!("bad user_level '{}'", other)))
                }
            };
            if let Some(minutes) = time_commitment {
                if minutes <= 0 {
                    return Err(CoreError::IntentInvalid("time_commitment must be positive".into()));
                }
            }
            Ok(Intent::GoalCreate {
                title,
                description,
                target_date,
                category,
                priority,
                user_level,
                time_commitment,
            })
        }

        RawIntent::GoalDelete {
            goal_id,
            set_id,
            ordinal,
            dry_run,
        } => {
            let target =
                require_target(goal_id, set_id, ordinal, ResultKind::Goals, store, resultsets, user_id)
                    .await?;
            Ok(Intent::GoalDelete { target, dry_run })
        }

        RawIntent::GoalQuery {
            goal_id,
            set_id,
            ordinal,
        } => {
            let target =
                require_target(goal_id, set_id, ordinal, ResultKind::Goals, store, resultsets, user_id)
                    .await?;
            Ok(Intent::GoalQuery { target })
        }

        RawIntent::GoalUpdateStep {
            step_id,
            set_id,
            ordinal,
            new_status,
        } => {
            let new_status = StepStatus::parse(&new_status)
                .ok_or_else(|| CoreError::IntentInvalid(format!("bad new_status '{}'", new_status)))?;
            let target =
                require_target(step_id, set_id, ordinal, ResultKind::Steps, store, resultsets, user_id)
                    .await?;
            Ok(Intent::GoalUpdateStep { target, new_status })
        }

        RawIntent::GoalAddStep {
            goal_id,
            title,
            order,
            planned_date,
            planned_time,
        } => {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(CoreError::IntentInvalid("step title is empty".into()));
            }
            let exists = store
                .get_goal_with_steps(user_id, goal_id)
                .await
                .map_err(CoreError::StoreTransient)?;
            let Some(goal) = exists else {
                return Err(CoreError::UnknownEntity(format!("goal {}", goal_id)));
            };
            let order = match order {
                None => None,
                Some(o) => {
                    let max_allowed = goal.steps.len() as i64 + 1;
                    if o < 1 || o > max_allowed {
                        return Err(CoreError::IntentInvalid(format!(
                            "order must be within 1..{}",
                            max_allowed
                        )));
                    }
                    Some(o as i32)
                }
            };
            Ok(Intent::GoalAddStep {
                goal_id,
                title,
                order,
                planned_date: opt_date(planned_date, "planned_date")?,
                planned_time: opt_time(planned_time, "planned_time")?,
            })
        }

        RawIntent::GoalDeleteStep {
            step_id,
            set_id,
            ordinal,
            dry_run,
        } => {
            let target =
                require_target(step_id, set_id, ordinal, ResultKind::Steps, store, resultsets, user_id)
                    .await?;
            Ok(Intent::GoalDeleteStep { target, dry_run })
        }

        RawIntent::ProductSearch { query, price_max } => {
            if query.trim().is_empty() {
                return Err(CoreError::IntentInvalid("query is empty".into()));
            }
            Ok(Intent::ProductSearch { query, price_max })
        }
    }
}

fn opt_date(raw: Option<String>, field: &str) -> Result<Option<NaiveDate>, CoreError> {
    match raw {
        None => Ok(None),
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| CoreError::IntentInvalid(format!("{} must be YYYY-MM-DD", field))),
    }
}

fn opt_time(raw: Option<String>, field: &str) -> Result<Option<NaiveTime>, CoreError> {
    match raw {
        None => Ok(None),
        Some(s) => parse_time(&s)
            .map(Some)
            .ok_or_else(|| CoreError::IntentInvalid(format!("{} must be HH:MM", field))),
    }
}

/// Build an optional target from the flattened wire fields, verifying that a
/// direct id exists and an ordinal is in range for a known set.
async fn opt_target(
    id: Option<i64>,
    set_id: Option<Uuid>,
    ordinal: Option<u64>,
    kind: ResultKind,
    store: &dyn Store,
    resultsets: &ResultSetCache,
    user_id: &str,
) -> Result<Option<TargetRef>, CoreError> {
    match (id, set_id, ordinal) {
        (None, None, None) => Ok(None),
        (Some(id), None, None) => {
            let exists = match kind {
                ResultKind::Events => store
                    .get_event(user_id, id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .is_some(),
                ResultKind::Goals => store
                    .get_goal(user_id, id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .is_some(),
                ResultKind::Steps => store
                    .get_step(user_id, id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .is_some(),
            };
            if !exists {
                return Err(CoreError::UnknownEntity(format!("{:?} {}", kind, id)));
            }
            Ok(Some(TargetRef::Id(id)))
        }
        (None, Some(set_id), Some(ordinal)) => {
            if ordinal == 0 {
                return Err(CoreError::UnknownEntity("ordinal 0".into()));
            }
            // Probe without consuming; the dispatcher re-resolves at execution.
            match resultsets
                .resolve(user_id, set_id, ordinal as usize, kind)
                .await
            {
                Ok(_) => Ok(Some(TargetRef::Ordinal {
                    set_id,
                    ordinal: ordinal as usize,
                })),
                Err(ResolveError::OrdinalOutOfRange(len)) => Err(CoreError::UnknownEntity(format!(
                    "ordinal {} of {}",
                    ordinal, len
                ))),
                Err(_) => Err(CoreError::UnknownEntity(format!("set {}", set_id))),
            }
        }
        _ => Err(CoreError::IntentInvalid(
            "target must be an id or a {set_id, ordinal} pair".into(),
        )),
    }
}

async fn require_target(
    id: Option<i64>,
    set_id: Option<Uuid>,
    ordinal: Option<u64>,
    kind: ResultKind,
    store: &dyn Store,
    resultsets: &ResultSetCache,
    user_id: &str,
) -> Result<TargetRef, CoreError> {
    opt_target(id, set_id, ordinal, kind, store, resultsets, user_id)
        .await?
        .ok_or_else(|| CoreError::IntentInvalid("missing target".into()))
}

//! Goal decomposition and auto-scheduling (component E).
//!
//! Phase 1 asks the model for an ordered step list and validates it hard.
//! Phase 2 builds a per-day availability map from the user's weekday
//! preferences and existing events. Phase 3 walks the steps in order and
//! packs them into free windows, advancing in 30-minute increments. All
//! placements persist in one transaction via `GoalStore::attach_schedule`.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::Deserialize;

use crate::error::CoreError;
use crate::prompts;
use crate::traits::store_prelude::*;
use crate::traits::{
    Event, GoalDraft, ModelAdapter, ModelError, ModelRequest, NewStep, Step, StepPlacement, Store,
    UserProfile,
};

/// Horizon bounds for the availability map, in days.
const MIN_HORIZON_DAYS: i64 = 14;
const MAX_HORIZON_DAYS: i64 = 90;

/// Slot search granularity.
const INCREMENT_MINUTES: i64 = 30;

const MIN_STEPS: usize = 3;
const MAX_STEPS: usize = 12;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlannedStep {
    pub title: String,
    pub estimated_hours: f64,
    pub order: i32,
}

/// Weekday set (0 = Monday .. 6 = Sunday) plus a preferred start time.
#[derive(Debug, Clone)]
pub struct SchedulingPrefs {
    pub weekdays: Vec<u8>,
    pub preferred_time: NaiveTime,
}

#[derive(Debug)]
pub struct ScheduleOutcome {
    pub placements: Vec<StepPlacement>,
    pub events: Vec<Event>,
    pub tight_deadline: bool,
    /// The goal was already scheduled; nothing was written.
    pub already_scheduled: bool,
}

// ---- Phase 1: decomposition ----

/// Ask the model for 3-12 ordered steps; one retry, then a single catch-all
/// step so goal creation never fails on a bad decomposition.
pub async fn decompose(
    model: &dyn ModelAdapter,
    draft: &GoalDraft,
    temperature: f32,
) -> Vec<NewStep> {
    let request = ModelRequest {
        system: prompts::decompose_goal(draft),
        user: draft.title.clone(),
        temperature,
    };

    for attempt in 0..2 {
        match model.complete(&request).await {
            Ok(text) => {
                if let Some(steps) = parse_step_list(&text) {
                    return steps
                        .into_iter()
                        .map(|s| NewStep {
                            title: s.title,
                            order: Some(s.order),
                            estimated_hours: Some(s.estimated_hours),
                            planned_date: None,
                            planned_time: None,
                        })
                        .collect();
                }
                tracing::warn!(attempt, "decomposition returned an invalid step list");
            }
            Err(ModelError::Timeout) => {
                tracing::warn!(attempt, "decomposition timed out");
            }
            Err(ModelError::Transport(e)) => {
                tracing::warn!(attempt, "decomposition transport failure: {:#}", e);
            }
        }
    }

    tracing::warn!(title = %draft.title, "decomposition failed twice, falling back to catch-all step");
    vec![NewStep {
        title: draft.title.clone(),
        order: Some(1),
        estimated_hours: Some(2.0),
        planned_date: None,
        planned_time: None,
    }]
}

/// Parse and validate the model's step array: 3-12 items, orders a
/// permutation of 1..=N, non-empty titles, positive hours.
pub fn parse_step_list(text: &str) -> Option<Vec<PlannedStep>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    let mut steps: Vec<PlannedStep> = serde_json::from_str(&text[start..=end]).ok()?;

    if steps.len() < MIN_STEPS || steps.len() > MAX_STEPS {
        return None;
    }
    if steps
        .iter()
        .any(|s| s.title.trim().is_empty() || s.estimated_hours <= 0.0)
    {
        return None;
    }
    steps.sort_by_key(|s| s.order);
    let orders_ok = steps
        .iter()
        .enumerate()
        .all(|(idx, s)| s.order == idx as i32 + 1);
    if !orders_ok {
        return None;
    }
    Some(steps)
}

// ---- Phase 2: availability map ----

/// Ordered list of schedulable days with their busy intervals (minutes from
/// local midnight, half-open).
#[derive(Debug)]
pub struct Availability {
    pub days: Vec<NaiveDate>,
    pub busy: HashMap<NaiveDate, Vec<(i64, i64)>>,
}

pub fn horizon_days(today: NaiveDate, target_date: Option<NaiveDate>) -> i64 {
    let until_target = target_date
        .map(|t| (t - today).num_days())
        .unwrap_or(MIN_HORIZON_DAYS);
    until_target.max(MIN_HORIZON_DAYS).min(MAX_HORIZON_DAYS)
}

/// Days start tomorrow: today's preferred hour may already be in the past.
pub fn build_availability(
    today: NaiveDate,
    horizon: i64,
    weekdays: &[u8],
    events: &[Event],
) -> Availability {
    let mut days = Vec::new();
    for offset in 1..=horizon {
        let day = today + Duration::days(offset);
        let weekday = day.weekday().num_days_from_monday() as u8;
        if weekdays.contains(&weekday) {
            days.push(day);
        }
    }

    let mut busy: HashMap<NaiveDate, Vec<(i64, i64)>> = HashMap::new();
    for event in events {
        // All-day events don't block timed placement.
        let Some(time) = event.time else { continue };
        let start = time.hour() as i64 * 60 + time.minute() as i64;
        let end = (start + event.duration_minutes.max(0)).min(24 * 60);
        busy.entry(event.date).or_default().push((start, end));
    }
    for intervals in busy.values_mut() {
        intervals.sort_unstable();
    }

    Availability { days, busy }
}

// ---- Phase 3: placement ----

fn overlaps(intervals: &[(i64, i64)], start: i64, end: i64) -> bool {
    intervals.iter().any(|&(s, e)| start < e && s < end)
}

/// Pack steps in order into the availability map. Returns the placements and
/// whether any landed past the target date.
pub fn place_steps(
    steps: &[Step],
    availability: &mut Availability,
    preferred_time: NaiveTime,
    target_date: Option<NaiveDate>,
) -> Result<(Vec<StepPlacement>, bool), CoreError> {
    if availability.days.is_empty() {
        return Err(CoreError::PlacementFailed("no available days".into()));
    }

    let preferred_minute = preferred_time.hour() as i64 * 60 + preferred_time.minute() as i64;
    let mut placements = Vec::with_capacity(steps.len());
    let mut tight_deadline = false;
    let mut day_idx = 0usize;

    for step in steps {
        let minutes = (step.estimated_hours.unwrap_or(1.0) * 60.0).ceil() as i64;
        let minutes = minutes.max(INCREMENT_MINUTES);

        let mut placed = false;
        while day_idx < availability.days.len() {
            let day = availability.days[day_idx];
            let intervals = availability.busy.entry(day).or_default();

            let mut start = preferred_minute;
            while start + minutes <= 24 * 60 {
                if !overlaps(intervals, start, start + minutes) {
                    break;
                }
                start += INCREMENT_MINUTES;
            }

            if start + minutes <= 24 * 60 {
                intervals.push((start, start + minutes));
                intervals.sort_unstable();

                let time = NaiveTime::from_hms_opt((start / 60) as u32, (start % 60) as u32, 0)
                    .expect("minute arithmetic stays within a day");
                if let Some(target) = target_date {
                    if day > target {
                        tight_deadline = true;
                    }
                }
                placements.push(StepPlacement {
                    step_id: step.id,
                    date: day,
                    time,
                    duration_minutes: minutes,
                });
                placed = true;
                break;
            }

            // Day exhausted from the preferred hour on; move along.
            day_idx += 1;
        }

        if !placed {
            return Err(CoreError::PlacementFailed(format!(
                "ran out of days after {} of {} steps",
                placements.len(),
                steps.len()
            )));
        }
    }

    Ok((placements, tight_deadline))
}

/// End-to-end scheduling for a persisted goal. Re-running for an already
/// scheduled goal is a no-op; callers must `clear_schedule` first to replan.
pub async fn schedule_goal(
    store: &dyn Store,
    user: &UserProfile,
    goal_id: i64,
    prefs: &SchedulingPrefs,
) -> Result<ScheduleOutcome, CoreError> {
    let gws = store
        .get_goal_with_steps(&user.user_id, goal_id)
        .await
        .map_err(CoreError::StoreTransient)?
        .ok_or_else(|| CoreError::UnknownEntity(format!("goal {}", goal_id)))?;

    if gws.goal.is_scheduled {
        return Ok(ScheduleOutcome {
            placements: vec![],
            events: vec![],
            tight_deadline: false,
            already_scheduled: true,
        });
    }

    let today = Utc::now().with_timezone(&user.tz()).date_naive();
    let horizon = horizon_days(today, gws.goal.target_date);
    let events = store
        .events_between(&user.user_id, today, today + Duration::days(horizon))
        .await
        .map_err(CoreError::StoreTransient)?;

    let mut availability = build_availability(today, horizon, &prefs.weekdays, &events);
    let (placements, tight_deadline) = place_steps(
        &gws.steps,
        &mut availability,
        prefs.preferred_time,
        gws.goal.target_date,
    )?;

    let events = store
        .attach_schedule(&user.user_id, goal_id, &placements)
        .await
        .map_err(crate::error::classify_anyhow_store)?;

    Ok(ScheduleOutcome {
        placements,
        events,
        tight_deadline,
        already_scheduled: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StepStatus;
    use crate::utils::{parse_date, parse_time};

    fn step(id: i64, order: i32, hours: f64) -> Step {
        Step {
            id,
            goal_id: 1,
            title: format!("шаг {}", order),
            order,
            status: StepStatus::Pending,
            estimated_hours: Some(hours),
            completed_at: None,
            planned_date: None,
            planned_time: None,
            duration_minutes: None,
            linked_event_id: None,
        }
    }

    fn timed_event(date: &str, time: &str, duration: i64) -> Event {
        Event {
            id: 1,
            user_id: "u1".into(),
            title: "занято".into(),
            date: parse_date(date).unwrap(),
            time: parse_time(time),
            duration_minutes: duration,
            repeat: None,
            notes: None,
            event_type: crate::traits::EventType::User,
            linked_step_id: None,
            linked_goal_id: None,
            reminder_minutes_before: 15,
            reminder_enabled: true,
        }
    }

    #[test]
    fn step_list_validation_enforces_bounds_and_permutation() {
        let good = r#"[{"title":"a","estimated_hours":1.0,"order":2},
                       {"title":"b","estimated_hours":2.0,"order":1},
                       {"title":"c","estimated_hours":0.5,"order":3}]"#;
        let steps = parse_step_list(good).unwrap();
        assert_eq!(steps[0].order, 1);
        assert_eq!(steps[0].title, "b");

        // Too few.
        assert!(parse_step_list(r#"[{"title":"a","estimated_hours":1.0,"order":1}]"#).is_none());
        // Duplicate orders.
        assert!(parse_step_list(
            r#"[{"title":"a","estimated_hours":1.0,"order":1},
                {"title":"b","estimated_hours":1.0,"order":1},
                {"title":"c","estimated_hours":1.0,"order":2}]"#
        )
        .is_none());
        // Non-positive hours.
        assert!(parse_step_list(
            r#"[{"title":"a","estimated_hours":0.0,"order":1},
                {"title":"b","estimated_hours":1.0,"order":2},
                {"title":"c","estimated_hours":1.0,"order":3}]"#
        )
        .is_none());
        // Prose around the array is tolerated.
        let wrapped = format!("Вот шаги:\n```json\n{}\n```", good);
        assert!(parse_step_list(&wrapped).is_some());
    }

    #[test]
    fn horizon_respects_floor_and_cap() {
        let today = parse_date("2026-08-02").unwrap();
        assert_eq!(horizon_days(today, None), 14);
        assert_eq!(horizon_days(today, parse_date("2026-08-05")), 14);
        assert_eq!(horizon_days(today, parse_date("2026-09-10")), 39);
        assert_eq!(horizon_days(today, parse_date("2027-08-02")), 90);
    }

    #[test]
    fn availability_selects_only_preferred_weekdays() {
        // 2026-08-03 is a Monday.
        let today = parse_date("2026-08-02").unwrap();
        let availability = build_availability(today, 14, &[0, 2, 4], &[]);
        assert!(!availability.days.is_empty());
        for day in &availability.days {
            let wd = day.weekday().num_days_from_monday() as u8;
            assert!([0u8, 2, 4].contains(&wd), "day {} wd {}", day, wd);
        }
        assert_eq!(availability.days[0], parse_date("2026-08-03").unwrap());
    }

    #[test]
    fn steps_pack_the_earliest_open_day_from_the_preferred_hour() {
        let today = parse_date("2026-08-02").unwrap();
        let mut availability = build_availability(today, 30, &[0, 2, 4], &[]);
        let steps = vec![step(1, 1, 2.0), step(2, 2, 2.0), step(3, 3, 2.0)];

        let (placements, tight) =
            place_steps(&steps, &mut availability, parse_time("18:00").unwrap(), None).unwrap();
        assert!(!tight);
        assert_eq!(placements.len(), 3);
        for placement in &placements {
            let wd = placement.date.weekday().num_days_from_monday() as u8;
            assert!([0u8, 2, 4].contains(&wd));
        }
        // The earliest day keeps absorbing steps until it has no window left.
        let monday = parse_date("2026-08-03").unwrap();
        assert_eq!(placements[0].date, monday);
        assert_eq!(placements[0].time, parse_time("18:00").unwrap());
        assert_eq!(placements[1].date, monday);
        assert_eq!(placements[1].time, parse_time("20:00").unwrap());
        assert_eq!(placements[2].date, monday);
        assert_eq!(placements[2].time, parse_time("22:00").unwrap());
    }

    #[test]
    fn conflict_advances_in_half_hour_increments() {
        let today = parse_date("2026-08-02").unwrap();
        // Monday 2026-08-03 is available; busy 18:00-19:00.
        let busy = vec![timed_event("2026-08-03", "18:00", 60)];
        let mut availability = build_availability(today, 14, &[0], &busy);

        let steps = vec![step(1, 1, 1.0)];
        let (placements, _) =
            place_steps(&steps, &mut availability, parse_time("18:00").unwrap(), None).unwrap();
        assert_eq!(placements[0].date, parse_date("2026-08-03").unwrap());
        assert_eq!(placements[0].time, parse_time("19:00").unwrap());
    }

    #[test]
    fn same_minute_conflict_moves_to_next_slot_or_day() {
        let today = parse_date("2026-08-02").unwrap();
        // Monday blocked 18:00 to midnight.
        let busy = vec![timed_event("2026-08-03", "18:00", 6 * 60)];
        let mut availability = build_availability(today, 14, &[0], &busy);

        let steps = vec![step(1, 1, 1.0)];
        let (placements, _) =
            place_steps(&steps, &mut availability, parse_time("18:00").unwrap(), None).unwrap();
        // Whole evening busy: lands on next Monday.
        assert_eq!(placements[0].date, parse_date("2026-08-10").unwrap());
        assert_eq!(placements[0].time, parse_time("18:00").unwrap());
    }

    #[test]
    fn placements_past_target_raise_tight_deadline_flag() {
        let today = parse_date("2026-08-02").unwrap();
        // Two available days per week, six 2h steps, deadline in 3 days.
        let mut availability = build_availability(today, 30, &[0, 3], &[]);
        let steps: Vec<Step> = (1..=6).map(|i| step(i, i as i32, 2.0)).collect();

        let (placements, tight) = place_steps(
            &steps,
            &mut availability,
            parse_time("18:00").unwrap(),
            parse_date("2026-08-05"),
        )
        .unwrap();
        assert!(tight);
        assert_eq!(placements.len(), 6);
        assert!(placements.iter().any(|p| p.date > parse_date("2026-08-05").unwrap()));
    }

    #[test]
    fn empty_weekday_set_is_a_placement_failure() {
        let today = parse_date("2026-08-02").unwrap();
        let mut availability = build_availability(today, 14, &[], &[]);
        let steps = vec![step(1, 1, 1.0)];
        let err = place_steps(&steps, &mut availability, parse_time("18:00").unwrap(), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::PlacementFailed(_)));
    }

    #[tokio::test]
    async fn schedule_is_idempotent_and_reschedule_after_clear_matches() {
        use crate::state::SqliteStore;
        use crate::traits::{GoalStore, UserStore};

        let store = SqliteStore::in_memory().await;
        let user = store.get_or_create_user("u1", 1, "UTC").await.unwrap();
        let gws = store
            .create_goal_with_steps(
                "u1",
                &GoalDraft {
                    title: "Выучить испанский язык".into(),
                    ..Default::default()
                },
                &[
                    NewStep {
                        title: "алфавит".into(),
                        order: None,
                        estimated_hours: Some(1.0),
                        planned_date: None,
                        planned_time: None,
                    },
                    NewStep {
                        title: "первые 100 слов".into(),
                        order: None,
                        estimated_hours: Some(2.0),
                        planned_date: None,
                        planned_time: None,
                    },
                ],
            )
            .await
            .unwrap();

        let prefs = SchedulingPrefs {
            weekdays: vec![0, 2, 4],
            preferred_time: parse_time("18:00").unwrap(),
        };

        let first = schedule_goal(&store, &user, gws.goal.id, &prefs).await.unwrap();
        assert!(!first.already_scheduled);
        assert_eq!(first.placements.len(), 2);
        assert_eq!(first.events.len(), 2);

        // Second run is a no-op.
        let second = schedule_goal(&store, &user, gws.goal.id, &prefs).await.unwrap();
        assert!(second.already_scheduled);
        assert!(second.placements.is_empty());

        // Unschedule then reschedule with unchanged availability reproduces
        // the same slots.
        store.clear_schedule("u1", gws.goal.id).await.unwrap();
        let third = schedule_goal(&store, &user, gws.goal.id, &prefs).await.unwrap();
        assert!(!third.already_scheduled);
        let firsts: Vec<_> = first.placements.iter().map(|p| (p.step_id, p.date, p.time)).collect();
        let thirds: Vec<_> = third.placements.iter().map(|p| (p.step_id, p.date, p.time)).collect();
        assert_eq!(firsts, thirds);
    }
}

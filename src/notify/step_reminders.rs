//! Step reminder job: daily at 20:00 local, one digest of unfinished steps
//! whose planned date slipped into the past, grouped by goal.

use chrono::DateTime;
use chrono_tz::Tz;

use super::Outbound;
use crate::traits::store_prelude::*;
use crate::traits::{Goal, Step, Store, UserProfile};
use crate::utils::{fmt_date_ru, html_escape};

const JOB_KIND: &str = "step_reminder";

pub(super) async fn collect(
    store: &dyn Store,
    user: &UserProfile,
    local_now: DateTime<Tz>,
) -> anyhow::Result<Vec<Outbound>> {
    let today = local_now.date_naive();
    let overdue = store.overdue_steps(&user.user_id, today).await?;
    if overdue.is_empty() {
        return Ok(vec![]);
    }

    let claimed = store
        .try_claim(&user.user_id, JOB_KIND, "digest", today)
        .await?;
    if !claimed {
        return Ok(vec![]);
    }

    Ok(vec![Outbound {
        user_id: user.user_id.clone(),
        chat_id: user.chat_id,
        html: format_digest(&overdue),
    }])
}

fn format_digest(overdue: &[(Step, Goal)]) -> String {
    let mut text = String::from("📋 <b>Незавершённые шаги</b>\n");
    let mut current_goal: Option<i64> = None;
    for (step, goal) in overdue {
        if current_goal != Some(goal.id) {
            text.push_str(&format!("\n🎯 <b>{}</b>\n", html_escape(&goal.title)));
            current_goal = Some(goal.id);
        }
        let planned = step.planned_date.map(fmt_date_ru).unwrap_or_default();
        text.push_str(&format!(
            "  • {} (план: {})\n",
            html_escape(&step.title),
            planned
        ));
    }
    text.push_str("\n✨ <i>Загляни в план и отметь, что уже готово!</i>");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteStore;
    use crate::traits::{GoalDraft, GoalStore, NewStep, StepPlacement, UserStore};
    use chrono::TimeZone;

    #[tokio::test]
    async fn digest_groups_overdue_steps_by_goal_and_dedups() {
        let store = SqliteStore::in_memory().await;
        let user = store.get_or_create_user("u1", 10, "UTC").await.unwrap();

        let gws = store
            .create_goal_with_steps(
                "u1",
                &GoalDraft {
                    title: "Испанский".into(),
                    ..Default::default()
                },
                &[
                    NewStep {
                        title: "просрочен".into(),
                        order: None,
                        estimated_hours: Some(1.0),
                        planned_date: None,
                        planned_time: None,
                    },
                    NewStep {
                        title: "в будущем".into(),
                        order: None,
                        estimated_hours: Some(1.0),
                        planned_date: None,
                        planned_time: None,
                    },
                ],
            )
            .await
            .unwrap();
        store
            .attach_schedule(
                "u1",
                gws.goal.id,
                &[
                    StepPlacement {
                        step_id: gws.steps[0].id,
                        date: chrono::NaiveDate::from_ymd_opt(2026, 7, 30).unwrap(),
                        time: chrono::NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                        duration_minutes: 60,
                    },
                    StepPlacement {
                        step_id: gws.steps[1].id,
                        date: chrono::NaiveDate::from_ymd_opt(2026, 8, 20).unwrap(),
                        time: chrono::NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                        duration_minutes: 60,
                    },
                ],
            )
            .await
            .unwrap();

        let local_now = chrono_tz::UTC.with_ymd_and_hms(2026, 8, 2, 20, 0, 0).unwrap();
        let messages = collect(&store, &user, local_now).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].html.contains("Испанский"));
        assert!(messages[0].html.contains("просрочен"));
        assert!(!messages[0].html.contains("в будущем"));

        assert!(collect(&store, &user, local_now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_overdue_means_no_digest() {
        let store = SqliteStore::in_memory().await;
        let user = store.get_or_create_user("u1", 10, "UTC").await.unwrap();
        let local_now = chrono_tz::UTC.with_ymd_and_hms(2026, 8, 2, 20, 0, 0).unwrap();
        assert!(collect(&store, &user, local_now).await.unwrap().is_empty());
    }
}

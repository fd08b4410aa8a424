//! Goal deadline job: daily at 09:00 local, warns about active goals whose
//! target date is 7, 3, 1 or 0 days out.

use chrono::{DateTime, Duration};
use chrono_tz::Tz;

use super::Outbound;
use crate::traits::store_prelude::*;
use crate::traits::{Goal, Store, UserProfile};
use crate::utils::{fmt_date_ru, html_escape};

const JOB_KIND: &str = "goal_deadline";
const WARNING_OFFSETS: [i64; 4] = [7, 3, 1, 0];

pub(super) async fn collect(
    store: &dyn Store,
    user: &UserProfile,
    local_now: DateTime<Tz>,
) -> anyhow::Result<Vec<Outbound>> {
    let today = local_now.date_naive();
    let dates: Vec<_> = WARNING_OFFSETS
        .iter()
        .map(|days| today + Duration::days(*days))
        .collect();

    let goals = store
        .active_goals_with_target_dates(&user.user_id, &dates)
        .await?;

    let mut messages = Vec::new();
    for goal in goals {
        let Some(target) = goal.target_date else { continue };
        let claimed = store
            .try_claim(&user.user_id, JOB_KIND, &format!("goal:{}", goal.id), today)
            .await?;
        if !claimed {
            continue;
        }
        let days_left = (target - today).num_days();
        messages.push(Outbound {
            user_id: user.user_id.clone(),
            chat_id: user.chat_id,
            html: format_warning(&goal, days_left),
        });
    }
    Ok(messages)
}

fn format_warning(goal: &Goal, days_left: i64) -> String {
    let when = match days_left {
        0 => "сегодня".to_string(),
        1 => "завтра".to_string(),
        n => format!("через {} дн.", n),
    };
    format!(
        "⏰ <b>Приближается дедлайн</b>\n\n🎯 <b>{}</b>\n\n📆 Срок: {} ({})\n📊 Прогресс: {}%",
        html_escape(&goal.title),
        when,
        goal.target_date.map(fmt_date_ru).unwrap_or_default(),
        goal.progress_percent,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteStore;
    use crate::traits::{GoalDraft, GoalStore, UserStore};
    use chrono::TimeZone;

    #[tokio::test]
    async fn warns_on_threshold_days_only_and_dedups() {
        let store = SqliteStore::in_memory().await;
        let user = store.get_or_create_user("u1", 10, "UTC").await.unwrap();
        let today = chrono::NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();

        for (title, offset) in [("семь", 7i64), ("три", 3), ("сегодня", 0), ("пять", 5)] {
            store
                .create_goal_with_steps(
                    "u1",
                    &GoalDraft {
                        title: title.into(),
                        target_date: Some(today + Duration::days(offset)),
                        ..Default::default()
                    },
                    &[],
                )
                .await
                .unwrap();
        }

        let local_now = chrono_tz::UTC.with_ymd_and_hms(2026, 8, 2, 9, 0, 0).unwrap();
        let messages = collect(&store, &user, local_now).await.unwrap();
        let bodies: Vec<&str> = messages.iter().map(|m| m.html.as_str()).collect();
        assert_eq!(messages.len(), 3);
        assert!(bodies.iter().any(|b| b.contains("семь") && b.contains("через 7 дн.")));
        assert!(bodies.iter().any(|b| b.contains("три")));
        assert!(bodies.iter().any(|b| b.contains("сегодня")));
        assert!(!bodies.iter().any(|b| b.contains("пять")));

        // Second pass the same local day fires nothing.
        let again = collect(&store, &user, local_now).await.unwrap();
        assert!(again.is_empty());
    }
}

//! Motivation job: daily at 08:00 local for users with at least one active
//! goal — a random opener plus a summary of what's in flight.

use chrono::DateTime;
use chrono_tz::Tz;
use rand::seq::SliceRandom;

use super::Outbound;
use crate::traits::store_prelude::*;
use crate::traits::{Goal, Store, UserProfile};
use crate::utils::html_escape;

const JOB_KIND: &str = "motivation";

const OPENERS: [&str; 8] = [
    "Доброе утро! 🌅 Каждый новый день — это возможность стать на шаг ближе к своей цели.",
    "Привет! ☀️ Маленькие шаги каждый день приводят к большим результатам.",
    "Доброе утро! 💪 Успех — это сумма небольших усилий, повторяемых изо дня в день.",
    "Привет! 🎯 Самая длинная дорога начинается с первого шага, и ты его уже сделал.",
    "Доброе утро! 🌟 Вера в себя и последовательность — твои главные союзники.",
    "Привет! ⚡ Сегодня отличный день, чтобы сделать ещё один шаг к мечте.",
    "Доброе утро! 🔥 Трудности — это возможности в рабочей одежде.",
    "Привет! 🚀 Невозможное становится возможным, когда ты продолжаешь идти.",
];

pub(super) async fn collect(
    store: &dyn Store,
    user: &UserProfile,
    local_now: DateTime<Tz>,
) -> anyhow::Result<Vec<Outbound>> {
    let goals = store.active_goals(&user.user_id).await?;
    if goals.is_empty() {
        return Ok(vec![]);
    }

    let today = local_now.date_naive();
    let claimed = store
        .try_claim(&user.user_id, JOB_KIND, "daily", today)
        .await?;
    if !claimed {
        return Ok(vec![]);
    }

    Ok(vec![Outbound {
        user_id: user.user_id.clone(),
        chat_id: user.chat_id,
        html: format_motivation(&goals),
    }])
}

fn format_motivation(goals: &[Goal]) -> String {
    let opener = OPENERS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(OPENERS[0]);

    let mut text = format!("{}\n\n<b>Твои цели:</b>\n", opener);
    for goal in goals.iter().take(3) {
        text.push_str(&format!(
            "\n🎯 {} — {}%",
            html_escape(&goal.title),
            goal.progress_percent
        ));
    }
    text.push_str("\n\n✨ <i>Вперёд к новым достижениям!</i>");
    text
}

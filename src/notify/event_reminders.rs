//! Event reminder job: fires when `event start − reminder_minutes_before`
//! falls inside the current minute window, in the event owner's zone.

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::Outbound;
use crate::traits::store_prelude::*;
use crate::traits::{Event, Store, UserProfile};
use crate::utils::{fmt_date_ru, fmt_time, html_escape};

const JOB_KIND: &str = "event_reminder";

pub(super) async fn collect(
    store: &dyn Store,
    user: &UserProfile,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Outbound>> {
    let tz = user.tz();
    let local_today = now.with_timezone(&tz).date_naive();

    let candidates = store
        .reminder_candidates(&user.user_id, local_today)
        .await?;

    let mut messages = Vec::new();
    for event in candidates {
        let Some(time) = event.time else { continue };
        // Ambiguous local times (DST folds) take the earlier instant.
        let Some(start) = tz
            .from_local_datetime(&event.date.and_time(time))
            .earliest()
        else {
            continue;
        };
        let remind_at = start.with_timezone(&Utc) - Duration::minutes(event.reminder_minutes_before);

        if remind_at < now || remind_at >= now + Duration::seconds(60) {
            continue;
        }

        let claimed = store
            .try_claim(
                &user.user_id,
                JOB_KIND,
                &format!("event:{}", event.id),
                local_today,
            )
            .await?;
        if !claimed {
            continue;
        }

        messages.push(Outbound {
            user_id: user.user_id.clone(),
            chat_id: user.chat_id,
            html: format_reminder(&event),
        });
    }
    Ok(messages)
}

fn format_reminder(event: &Event) -> String {
    let minutes = event.reminder_minutes_before;
    let lead = if minutes < 60 {
        format!("{} минут", minutes)
    } else if minutes % 60 == 0 {
        format!("{} ч", minutes / 60)
    } else {
        format!("{} ч {} мин", minutes / 60, minutes % 60)
    };

    let mut text = format!(
        "🔔 <b>Напоминание о событии</b>\n\n📅 <b>{}</b>\n\n⏰ Начало через {}\n🕐 Время: {}\n📆 Дата: {}",
        html_escape(&event.title),
        lead,
        event.time.map(fmt_time).unwrap_or_else(|| "??".into()),
        fmt_date_ru(event.date),
    );
    if let Some(notes) = &event.notes {
        text.push_str(&format!("\n\n💬 {}", html_escape(notes)));
    }
    text
}

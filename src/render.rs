//! User-facing rendering: HTML fragments (restricted to `<b> <i> <code>
//! <pre>`), list items for `render_table` responses, and inline keyboards.

use crate::traits::{Event, Goal, GoalWithSteps, Step, StepStatus};
use crate::types::{Button, Keyboard};
use crate::utils::{fmt_date_ru, fmt_time, html_escape};

pub fn status_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "⬜",
        StepStatus::InProgress => "🔄",
        StepStatus::Completed => "✅",
    }
}

/// Numbered event list; the ordinal shown matches the result set ordering.
pub fn events_list_html(events: &[Event]) -> String {
    let mut out = String::from("<b>События</b>\n");
    for (idx, event) in events.iter().enumerate() {
        let when = match event.time {
            Some(time) => format!("{} {}", fmt_date_ru(event.date), fmt_time(time)),
            None => format!("{} (весь день)", fmt_date_ru(event.date)),
        };
        out.push_str(&format!(
            "{}. {} — {}\n",
            idx + 1,
            when,
            html_escape(&event.title)
        ));
    }
    out
}

pub fn goals_list_html(goals: &[Goal]) -> String {
    let mut out = String::from("<b>Цели</b>\n");
    for (idx, goal) in goals.iter().enumerate() {
        let deadline = goal
            .target_date
            .map(|d| format!(" (до {})", fmt_date_ru(d)))
            .unwrap_or_default();
        out.push_str(&format!(
            "{}. {} — {}%{}\n",
            idx + 1,
            html_escape(&goal.title),
            goal.progress_percent,
            deadline
        ));
    }
    out
}

pub fn goal_details_html(gws: &GoalWithSteps) -> String {
    let mut out = format!(
        "<b>{}</b> — {}%\n",
        html_escape(&gws.goal.title),
        gws.goal.progress_percent
    );
    if let Some(date) = gws.goal.target_date {
        out.push_str(&format!("Дедлайн: {}\n", fmt_date_ru(date)));
    }
    if gws.steps.is_empty() {
        out.push_str("\n<i>Шагов пока нет.</i>\n");
    } else {
        out.push('\n');
        for step in &gws.steps {
            let planned = match (step.planned_date, step.planned_time) {
                (Some(date), Some(time)) => {
                    format!(" — {} {}", fmt_date_ru(date), fmt_time(time))
                }
                (Some(date), None) => format!(" — {}", fmt_date_ru(date)),
                _ => String::new(),
            };
            out.push_str(&format!(
                "{} {}. {}{}\n",
                status_icon(step.status),
                step.order,
                html_escape(&step.title),
                planned
            ));
        }
    }
    out
}

pub fn event_to_item(event: &Event, ordinal: usize) -> serde_json::Value {
    serde_json::json!({
        "ordinal": ordinal,
        "id": event.id,
        "title": event.title,
        "date": event.date.format("%Y-%m-%d").to_string(),
        "time": event.time.map(fmt_time),
        "duration_minutes": event.duration_minutes,
    })
}

pub fn goal_to_item(goal: &Goal, ordinal: usize) -> serde_json::Value {
    serde_json::json!({
        "ordinal": ordinal,
        "id": goal.id,
        "title": goal.title,
        "status": goal.status.as_str(),
        "progress_percent": goal.progress_percent,
        "target_date": goal.target_date.map(|d| d.format("%Y-%m-%d").to_string()),
    })
}

pub fn step_to_item(step: &Step, ordinal: usize) -> serde_json::Value {
    serde_json::json!({
        "ordinal": ordinal,
        "id": step.id,
        "title": step.title,
        "order": step.order,
        "status": step.status.as_str(),
        "planned_date": step.planned_date.map(|d| d.format("%Y-%m-%d").to_string()),
        "planned_time": step.planned_time.map(fmt_time),
    })
}

// ---- keyboards ----

const WEEKDAY_LABELS: [&str; 7] = ["Пн", "Вт", "Ср", "Чт", "Пт", "Сб", "Вс"];

/// Two rows of weekday toggles (selected ones get a check mark), then
/// done/cancel.
pub fn weekday_keyboard(selected: &[u8]) -> Keyboard {
    let day_button = |day: u8| {
        let label = if selected.contains(&day) {
            format!("✅ {}", WEEKDAY_LABELS[day as usize])
        } else {
            WEEKDAY_LABELS[day as usize].to_string()
        };
        Button::new(label, format!("day_pref:{}", day))
    };
    vec![
        (0..4).map(day_button).collect(),
        (4..7).map(day_button).collect(),
        vec![
            Button::new("Готово", "day_pref_done"),
            Button::new("Отмена", "cancel"),
        ],
    ]
}

pub fn time_pref_keyboard() -> Keyboard {
    vec![
        vec![
            Button::new("Утром (09:00)", "time_pref:morning"),
            Button::new("Днём (14:00)", "time_pref:afternoon"),
            Button::new("Вечером (18:00)", "time_pref:evening"),
        ],
        vec![Button::new("Отмена", "cancel")],
    ]
}

pub fn goal_edit_keyboard(goal_id: i64) -> Keyboard {
    vec![
        vec![
            Button::new("Название", format!("edit:goal:title:{}", goal_id)),
            Button::new("Описание", format!("edit:goal:description:{}", goal_id)),
        ],
        vec![
            Button::new("Дедлайн", format!("edit:goal:deadline:{}", goal_id)),
            Button::new("Категория", format!("edit:goal:category:{}", goal_id)),
            Button::new("Приоритет", format!("edit:goal:priority:{}", goal_id)),
        ],
        vec![Button::new("Отмена", "cancel")],
    ]
}

pub fn confirm_keyboard(op: &str, id: i64) -> Keyboard {
    vec![vec![
        Button::new("Да", format!("confirm:{}:{}", op, id)),
        Button::new("Отмена", "cancel"),
    ]]
}

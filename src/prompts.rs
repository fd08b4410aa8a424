//! Prompt templates: plain functions from a named-parameter bag to a string.
//! The recognized parameters of each template are its function signature.

use crate::context::PromptBundle;
use crate::traits::{GoalDraft, Role};
use crate::utils::fmt_time;

/// System prompt for the intent parser. Lists the closed intent set with its
/// fixed JSON keys and injects the per-turn context slots.
pub fn intent_parser(bundle: &PromptBundle) -> String {
    let mut prompt = format!(
        "Ты — персональный коуч и ассистент пользователя {name}. Помогаешь управлять целями, \
         шагами и календарём через короткие сообщения.\n\n\
         Текущее время: {now} ({tz})\n",
        name = bundle.user_name,
        now = bundle.now_local,
        tz = bundle.timezone,
    );

    if !bundle.active_goals.is_empty() {
        prompt.push_str("\nАктивные цели пользователя:\n");
        for goal in &bundle.active_goals {
            match goal.target_date {
                Some(date) => prompt.push_str(&format!(
                    "- {} — {}% (до {})\n",
                    goal.title, goal.progress_percent, date
                )),
                None => prompt.push_str(&format!(
                    "- {} — {}%\n",
                    goal.title, goal.progress_percent
                )),
            }
        }
    }

    if !bundle.upcoming_events.is_empty() {
        prompt.push_str("\nБлижайшие события:\n");
        for event in &bundle.upcoming_events {
            match event.time {
                Some(time) => prompt.push_str(&format!(
                    "- {} {} {}\n",
                    event.date,
                    fmt_time(time),
                    event.title
                )),
                None => prompt.push_str(&format!("- {} (весь день) {}\n", event.date, event.title)),
            }
        }
    }

    if !bundle.history.is_empty() {
        prompt.push_str("\nИстория последних сообщений:\n");
        for (role, text) in &bundle.history {
            let who = match role {
                Role::User => "пользователь",
                Role::Assistant => "ассистент",
            };
            prompt.push_str(&format!("{}: {}\n", who, text));
        }
    }

    if let Some(state) = &bundle.state_context {
        prompt.push_str(&format!("\nТекущий диалог: {}\n", state));
    }

    prompt.push_str(INTENT_PROTOCOL);
    prompt
}

const INTENT_PROTOCOL: &str = r#"
Всегда возвращай ТОЛЬКО один JSON-объект, ни одного символа вне JSON.

Поддерживаемые intent (закрытый список):

1) small_talk — свободный ответ
{ "intent": "small_talk", "reply_hint": "<дружелюбный ответ>" }

2) event.search — найти события по фильтрам
{ "intent": "event.search", "title_like": "<подстрока или null>",
  "date_from": "YYYY-MM-DD" | null, "date_to": "YYYY-MM-DD" | null,
  "time_from": "HH:MM" | null, "time_to": "HH:MM" | null }

3) event.mutate — создать / изменить / удалить событие
{ "intent": "event.mutate", "op": "create" | "update" | "delete",
  "title": "<строка>", "date": "YYYY-MM-DD", "time": "HH:MM",
  "duration_minutes": <число>,
  "event_id": <id> ИЛИ "set_id": "<uuid>", "ordinal": <номер в последнем списке, с 1> }

4) goal.search — показать цели
{ "intent": "goal.search", "status": "active" | "paused" | "completed" | null }

5) goal.create — создать цель
{ "intent": "goal.create", "title": "<название цели>", "description": "<детали или null>",
  "target_date": "YYYY-MM-DD" | null, "category": "<строка или null>",
  "priority": "low" | "medium" | "high" | null,
  "user_level": "beginner" | "intermediate" | "advanced" | null,
  "time_commitment": <минут в неделю или null> }

6) goal.delete — удалить цель
{ "intent": "goal.delete", "goal_id": <id> ИЛИ "set_id": "<uuid>", "ordinal": <номер> }

7) goal.query — прогресс конкретной цели
{ "intent": "goal.query", "goal_id": <id> ИЛИ "set_id": "<uuid>", "ordinal": <номер> }

8) goal.update_step — сменить статус шага
{ "intent": "goal.update_step", "step_id": <id> ИЛИ "set_id": "<uuid>", "ordinal": <номер>,
  "new_status": "pending" | "in_progress" | "completed" }

9) goal.add_step — добавить шаг к цели
{ "intent": "goal.add_step", "goal_id": <id>, "title": "<название шага>",
  "order": <позиция или null>, "planned_date": "YYYY-MM-DD" | null, "planned_time": "HH:MM" | null }

10) goal.delete_step — удалить шаг
{ "intent": "goal.delete_step", "step_id": <id> ИЛИ "set_id": "<uuid>", "ordinal": <номер> }

11) product.search — найти товар
{ "intent": "product.search", "query": "<что ищем>", "price_max": <число или null> }

Требования:
- Все относительные даты ("завтра", "на этой неделе") переводи САМ в YYYY-MM-DD
  относительно текущего времени выше.
- Не выдумывай id. Если пользователь ссылается на пункт списка ("вторую", "последнее"),
  используй set_id последнего показанного списка и ordinal.
- Если запрос не про цели, события или товары — это small_talk.
"#;

/// Prompt for goal decomposition into 3-12 ordered steps.
pub fn decompose_goal(draft: &GoalDraft) -> String {
    let mut prompt = format!(
        "Пользователь хочет достичь цели: \"{}\"\n",
        draft.title.trim()
    );
    if let Some(description) = &draft.description {
        prompt.push_str(&format!("Детали: {}\n", description));
    }
    if let Some(level) = &draft.user_level {
        prompt.push_str(&format!("Текущий уровень: {}\n", level));
    }
    if let Some(minutes) = &draft.time_commitment {
        prompt.push_str(&format!("Время в неделю: {} минут\n", minutes));
    }
    if let Some(date) = draft.target_date {
        prompt.push_str(&format!("Дедлайн: {}\n", date));
    }

    prompt.push_str(
        "\nРазбей цель на 3-12 конкретных шагов. Каждый шаг должен быть действенным, \
         реалистичным и измеримым.\n\n\
         Верни ТОЛЬКО JSON-массив:\n\
         [\n  {\"title\": \"Шаг 1\", \"estimated_hours\": 2.0, \"order\": 1},\n  \
         {\"title\": \"Шаг 2\", \"estimated_hours\": 5.0, \"order\": 2}\n]\n",
    );
    prompt
}

/// Prompt for the result summarizer: given the executed intent and its raw
/// result, write the user-facing phrase. The output strategy is already
/// chosen by the dispatcher; the model only writes prose.
pub fn summarize(intent_tag: &str, result_json: &serde_json::Value) -> String {
    format!(
        "Ты — мотивирующий коуч. Сформулируй короткий ответ пользователю по результату \
         операции.\n\n\
         Принципы:\n\
         - Празднуй успехи: \"Отлично! Ты создал цель...\"\n\
         - Мотивируй к действию: \"Начни с первого шага...\"\n\
         - Будь конкретным, без общих фраз\n\
         - Одно-два предложения, по-русски\n\n\
         Операция: {}\n\
         Результат:\n{}\n\n\
         Верни ТОЛЬКО текст ответа, без JSON и без кавычек.",
        intent_tag,
        serde_json::to_string_pretty(result_json).unwrap_or_else(|_| "{}".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EventSlot, GoalSlot};
    use crate::utils::{parse_date, parse_time};

    fn bundle() -> PromptBundle {
        PromptBundle {
            user_name: "Анна".into(),
            timezone: "Europe/Moscow".into(),
            now_local: "2026-08-02 14:30".into(),
            today_local: parse_date("2026-08-02").unwrap(),
            active_goals: vec![GoalSlot {
                title: "Выучить испанский".into(),
                progress_percent: 40,
                target_date: parse_date("2026-11-01"),
            }],
            upcoming_events: vec![EventSlot {
                title: "Созвон".into(),
                date: parse_date("2026-08-03").unwrap(),
                time: parse_time("10:00"),
            }],
            history: vec![(Role::User, "привет".into())],
            state_context: Some("goal_clarification: {}".into()),
        }
    }

    #[test]
    fn parser_prompt_contains_all_slots_and_protocol() {
        let prompt = intent_parser(&bundle());
        assert!(prompt.contains("Анна"));
        assert!(prompt.contains("2026-08-02 14:30"));
        assert!(prompt.contains("Выучить испанский — 40%"));
        assert!(prompt.contains("Созвон"));
        assert!(prompt.contains("пользователь: привет"));
        assert!(prompt.contains("Текущий диалог: goal_clarification"));
        for tag in [
            "small_talk",
            "event.search",
            "event.mutate",
            "goal.search",
            "goal.create",
            "goal.delete",
            "goal.query",
            "goal.update_step",
            "goal.add_step",
            "goal.delete_step",
            "product.search",
        ] {
            assert!(prompt.contains(tag), "missing {}", tag);
        }
    }

    #[test]
    fn empty_slots_are_omitted() {
        let mut b = bundle();
        b.active_goals.clear();
        b.upcoming_events.clear();
        b.history.clear();
        b.state_context = None;
        let prompt = intent_parser(&b);
        assert!(!prompt.contains("Активные цели"));
        assert!(!prompt.contains("Ближайшие события"));
        assert!(!prompt.contains("История"));
        assert!(!prompt.contains("Текущий диалог"));
    }

    #[test]
    fn decompose_prompt_carries_draft_fields() {
        let draft = GoalDraft {
            title: "Пробежать марафон".into(),
            description: Some("весной".into()),
            user_level: Some("beginner".into()),
            time_commitment: Some(240),
            target_date: parse_date("2027-04-20"),
            ..Default::default()
        };
        let prompt = decompose_goal(&draft);
        assert!(prompt.contains("Пробежать марафон"));
        assert!(prompt.contains("240 минут"));
        assert!(prompt.contains("2027-04-20"));
        assert!(prompt.contains("3-12"));
    }
}

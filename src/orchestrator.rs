//! The per-turn pipeline (components B-E glued together): context assembly,
//! intent parsing, dialog interception, dispatch, summarization, response
//! construction. One instance serves all users; per-user ordering comes from
//! the lock registry, and every turn runs under the request deadline.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::context;
use crate::dialog::{
    is_stale, smart_check, Callback, DialogContext, DialogState, EventField, GoalField, StepField,
};
use crate::error::{classify_anyhow_store, CoreError};
use crate::intent::{self, Intent, MutateOp, TargetRef};
use crate::planner::{self, SchedulingPrefs};
use crate::prompts;
use crate::render;
use crate::resultset::{ResolveError, ResultKind, ResultSetCache};
use crate::traits::store_prelude::*;
use crate::traits::{
    AnalyticsSink, EventFilter, EventPatch, GoalDraft, GoalPatch, ModelAdapter, ModelRequest,
    NewEvent, NewMessage, NewStep, Priority, Role, SessionRecord, SpeechToText, StepPatch, Store,
    UserProfile,
};
use crate::types::{TurnHints, TurnResponse};
use crate::userlock::UserLocks;
use crate::utils::{fmt_date_ru, fmt_time, parse_date, parse_time};

pub struct Orchestrator {
    store: Arc<dyn Store + Send + Sync>,
    model: Arc<dyn ModelAdapter>,
    stt: Option<Arc<dyn SpeechToText>>,
    analytics: Arc<dyn AnalyticsSink>,
    pub resultsets: Arc<ResultSetCache>,
    locks: UserLocks,
    temperature: f32,
    default_timezone: String,
    dialog_timeout_s: u64,
    request_deadline: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        model: Arc<dyn ModelAdapter>,
        stt: Option<Arc<dyn SpeechToText>>,
        analytics: Arc<dyn AnalyticsSink>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            model,
            stt,
            analytics,
            resultsets: Arc::new(ResultSetCache::new(
                Duration::from_secs(config.result_set_ttl_s),
                config.result_set_capacity,
            )),
            locks: UserLocks::new(),
            temperature: config.model_temperature,
            default_timezone: config.default_timezone.clone(),
            dialog_timeout_s: config.dialog_state_timeout_s,
            request_deadline: Duration::from_secs(config.request_deadline_s),
        }
    }

    /// Handle one inbound utterance. Never panics outward: every failure is
    /// folded into a fixed user-facing reply.
    pub async fn process_message(
        &self,
        user_id: &str,
        message: &str,
        hints: &TurnHints,
    ) -> TurnResponse {
        let work = async {
            let _guard = self.locks.acquire(user_id).await;
            self.message_turn(user_id, message, hints).await
        };
        let result = tokio::time::timeout(self.request_deadline, work).await;
        self.finish(user_id, result)
    }

    /// Handle one button press.
    pub async fn process_callback(
        &self,
        user_id: &str,
        callback_data: &str,
        hints: &TurnHints,
    ) -> TurnResponse {
        let work = async {
            let _guard = self.locks.acquire(user_id).await;
            self.callback_turn(user_id, callback_data, hints).await
        };
        let result = tokio::time::timeout(self.request_deadline, work).await;
        self.finish(user_id, result)
    }

    fn finish(
        &self,
        user_id: &str,
        result: Result<Result<TurnResponse, CoreError>, tokio::time::error::Elapsed>,
    ) -> TurnResponse {
        match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let reply = e
                    .user_reply()
                    .unwrap_or("Упс, произошла ошибка. Попробуй ещё раз.");
                warn!(user_id, "turn failed: {}", e);
                TurnResponse::failure(reply, e.to_string())
            }
            Err(_) => {
                warn!(user_id, "request deadline elapsed");
                let e = CoreError::Deadline;
                TurnResponse::failure(e.user_reply().unwrap(), e.to_string())
            }
        }
    }

    async fn load_user(&self, user_id: &str, hints: &TurnHints) -> Result<UserProfile, CoreError> {
        let chat_id = hints
            .chat_id
            .or_else(|| user_id.parse::<i64>().ok())
            .unwrap_or(0);
        self.store
            .get_or_create_user(user_id, chat_id, &self.default_timezone)
            .await
            .map_err(CoreError::StoreTransient)
    }

    /// Fetch the session, applying the inactivity reset.
    async fn load_session(&self, user_id: &str) -> Result<SessionRecord, CoreError> {
        let session = self
            .store
            .get_session(user_id)
            .await
            .map_err(CoreError::StoreTransient)?;
        if is_stale(&session, self.dialog_timeout_s) {
            info!(user_id, state = %session.state, "dialog state timed out, resetting to idle");
            self.set_state(user_id, DialogState::Idle, &DialogContext::default())
                .await?;
            return Ok(SessionRecord {
                state: "idle".into(),
                context: json!({}),
                ..session
            });
        }
        Ok(session)
    }

    async fn set_state(
        &self,
        user_id: &str,
        state: DialogState,
        ctx: &DialogContext,
    ) -> Result<(), CoreError> {
        self.store
            .set_session(user_id, state.as_str(), &ctx.to_value())
            .await
            .map_err(CoreError::StoreTransient)
    }

    async fn record_turn(&self, user_id: &str, user_text: &str, reply: &TurnResponse, intent: Option<&str>) {
        let user_msg = NewMessage {
            user_id: user_id.to_string(),
            role: Role::User,
            text: user_text.to_string(),
            intent: None,
        };
        if let Err(e) = self.store.append_message(&user_msg).await {
            warn!(user_id, "failed to append user message: {:#}", e);
        }
        let assistant_msg = NewMessage {
            user_id: user_id.to_string(),
            role: Role::Assistant,
            text: reply.text.clone(),
            intent: intent.map(str::to_string),
        };
        if let Err(e) = self.store.append_message(&assistant_msg).await {
            warn!(user_id, "failed to append assistant message: {:#}", e);
        }
    }

    // ---- message path ----

    async fn message_turn(
        &self,
        user_id: &str,
        message: &str,
        hints: &TurnHints,
    ) -> Result<TurnResponse, CoreError> {
        let user = self.load_user(user_id, hints).await?;

        let text = match self.resolve_text(message, hints).await? {
            Some(text) => text,
            None => {
                return Ok(TurnResponse::text(
                    "Я не расслышал голосовое сообщение. Попробуй ещё раз или напиши текстом.",
                ))
            }
        };

        self.analytics
            .emit(user_id, "message_received", json!({"chars": text.chars().count()}));

        let session = self.load_session(user_id).await?;
        let state = DialogState::parse(&session.state).unwrap_or_default();
        let ctx = DialogContext::from_value(&session.context);

        let (response, intent_tag) = if state.consumes_free_text() {
            let response = self.consume_free_text(&user, state, ctx, &text).await?;
            (response, None)
        } else {
            self.intent_turn(&user, &session, &text, hints).await?
        };

        self.record_turn(user_id, &text, &response, intent_tag.as_deref())
            .await;
        Ok(response)
    }

    async fn resolve_text(
        &self,
        message: &str,
        hints: &TurnHints,
    ) -> Result<Option<String>, CoreError> {
        if !message.trim().is_empty() {
            return Ok(Some(message.trim().to_string()));
        }
        let Some(voice_b64) = hints.voice_b64.as_deref() else {
            return Ok(Some(String::new()));
        };
        let Some(stt) = &self.stt else {
            return Ok(None);
        };
        let audio = base64::engine::general_purpose::STANDARD
            .decode(voice_b64)
            .map_err(|_| CoreError::IntentInvalid("voice_b64 is not base64".into()))?;
        match stt.transcribe(&audio).await {
            Ok(transcript) if !transcript.trim().is_empty() => {
                Ok(Some(transcript.trim().to_string()))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("transcription failed: {:#}", e);
                Ok(None)
            }
        }
    }

    async fn intent_turn(
        &self,
        user: &UserProfile,
        session: &SessionRecord,
        text: &str,
        hints: &TurnHints,
    ) -> Result<(TurnResponse, Option<String>), CoreError> {
        let bundle =
            context::assemble(self.store.as_ref(), user, session, hints.display_name.as_deref())
                .await;
        let system_prompt = prompts::intent_parser(&bundle);

        let raw = intent::parse_intent(self.model.as_ref(), &system_prompt, text, self.temperature)
            .await?;
        let parsed = intent::validate(
            raw,
            self.store.as_ref(),
            &self.resultsets,
            &user.user_id,
        )
        .await?;
        let tag = parsed.tag().to_string();
        info!(user_id = %user.user_id, intent = %tag, "intent dispatched");
        self.analytics
            .emit(&user.user_id, "intent_parsed", json!({"intent": tag}));

        let response = self.dispatch(user, parsed).await?;
        Ok((response, Some(tag)))
    }

    // ---- dispatcher (component C) ----

    async fn dispatch(
        &self,
        user: &UserProfile,
        parsed: Intent,
    ) -> Result<TurnResponse, CoreError> {
        let user_id = &user.user_id;
        match parsed {
            Intent::SmallTalk { reply_hint } => Ok(TurnResponse::text(reply_hint)),

            Intent::EventSearch {
                title_like,
                date_from,
                date_to,
                time_from,
                time_to,
            } => {
                let filter = EventFilter {
                    title_like,
                    date_from,
                    date_to,
                    time_from,
                    time_to,
                    limit: 50,
                };
                let events = self
                    .store
                    .search_events(user_id, &filter)
                    .await
                    .map_err(CoreError::StoreTransient)?;
                if events.is_empty() {
                    return Ok(TurnResponse::text("Событий не найдено."));
                }
                let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
                let set_id = self.resultsets.insert(user_id, ResultKind::Events, ids).await;
                let items = events
                    .iter()
                    .enumerate()
                    .map(|(idx, e)| render::event_to_item(e, idx + 1))
                    .collect();
                Ok(TurnResponse::table(
                    render::events_list_html(&events),
                    items,
                    set_id,
                ))
            }

            Intent::EventMutate {
                op,
                title,
                date,
                time,
                duration_minutes,
                target,
                dry_run,
            } => {
                self.dispatch_event_mutate(user, op, title, date, time, duration_minutes, target, dry_run)
                    .await
            }

            Intent::GoalSearch { status } => {
                let goals = self
                    .store
                    .list_goals(user_id, status)
                    .await
                    .map_err(CoreError::StoreTransient)?;
                let ids: Vec<i64> = goals.iter().map(|g| g.id).collect();
                let set_id = self.resultsets.insert(user_id, ResultKind::Goals, ids).await;
                let text = if goals.is_empty() {
                    "Целей пока нет. Расскажи, чего хочешь достичь, и я помогу составить план!"
                        .to_string()
                } else {
                    render::goals_list_html(&goals)
                };
                let items = goals
                    .iter()
                    .enumerate()
                    .map(|(idx, g)| render::goal_to_item(g, idx + 1))
                    .collect();
                Ok(TurnResponse::table(text, items, set_id))
            }

            Intent::GoalCreate {
                title,
                description,
                target_date,
                category,
                priority,
                user_level,
                time_commitment,
            } => {
                let draft = GoalDraft {
                    title,
                    description,
                    target_date,
                    category,
                    priority,
                    user_level: user_level.map(|l| {
                        match l {
                            intent::UserLevel::Beginner => "beginner",
                            intent::UserLevel::Intermediate => "intermediate",
                            intent::UserLevel::Advanced => "advanced",
                        }
                        .to_string()
                    }),
                    time_commitment,
                };
                self.goal_create_flow(user, draft).await
            }

            Intent::GoalDelete { target, dry_run } => {
                let goal_id = self.resolve(user_id, target, ResultKind::Goals).await?;
                let goal = self
                    .store
                    .get_goal(user_id, goal_id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("goal {}", goal_id)))?;
                if dry_run {
                    let text = format!(
                        "Удалить цель «{}» со всеми шагами и событиями?",
                        crate::utils::html_escape(&goal.title)
                    );
                    return Ok(TurnResponse::clarification(text)
                        .with_buttons(render::confirm_keyboard("delete_goal", goal_id)));
                }
                self.store
                    .delete_goal(user_id, goal_id)
                    .await
                    .map_err(CoreError::StoreTransient)?;
                self.analytics
                    .emit(user_id, "goal_deleted", json!({"goal_id": goal_id}));
                let fallback = format!(
                    "Цель «{}» удалена.",
                    crate::utils::html_escape(&goal.title)
                );
                let text = self
                    .summarize("goal.delete", &json!({"deleted": goal.title}), &fallback)
                    .await;
                Ok(TurnResponse::text(text))
            }

            Intent::GoalQuery { target } => {
                let goal_id = self.resolve(user_id, target, ResultKind::Goals).await?;
                let gws = self
                    .store
                    .get_goal_with_steps(user_id, goal_id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("goal {}", goal_id)))?;
                let ids: Vec<i64> = gws.steps.iter().map(|s| s.id).collect();
                let set_id = self.resultsets.insert(user_id, ResultKind::Steps, ids).await;
                let items = gws
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(idx, s)| render::step_to_item(s, idx + 1))
                    .collect();
                Ok(
                    TurnResponse::table(render::goal_details_html(&gws), items, set_id)
                        .with_buttons(render::goal_edit_keyboard(goal_id)),
                )
            }

            Intent::GoalUpdateStep { target, new_status } => {
                let step_id = self.resolve(user_id, target, ResultKind::Steps).await?;
                let (step, goal) = self
                    .store
                    .update_step_status(user_id, step_id, new_status)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("step {}", step_id)))?;
                self.analytics.emit(
                    user_id,
                    "step_status_changed",
                    json!({"step_id": step.id, "status": new_status.as_str()}),
                );
                let fallback = if goal.progress_percent == 100 {
                    format!(
                        "Поздравляю! Цель «{}» полностью выполнена! 🎉",
                        crate::utils::html_escape(&goal.title)
                    )
                } else {
                    format!(
                        "Готово! Шаг «{}» теперь «{}». Прогресс цели: {}%.",
                        crate::utils::html_escape(&step.title),
                        ru_status(new_status),
                        goal.progress_percent
                    )
                };
                let result = json!({
                    "step": step.title,
                    "new_status": new_status.as_str(),
                    "goal": goal.title,
                    "progress_percent": goal.progress_percent,
                    "goal_completed": goal.progress_percent == 100,
                });
                let text = self.summarize("goal.update_step", &result, &fallback).await;
                Ok(TurnResponse::text(text))
            }

            Intent::GoalAddStep {
                goal_id,
                title,
                order,
                planned_date,
                planned_time,
            } => {
                let step = self
                    .store
                    .add_step(
                        user_id,
                        goal_id,
                        &NewStep {
                            title: title.clone(),
                            order,
                            estimated_hours: None,
                            planned_date,
                            planned_time,
                        },
                    )
                    .await
                    .map_err(classify_anyhow_store)?;
                let fallback = format!(
                    "Отлично! Шаг «{}» добавлен (№{}).",
                    crate::utils::html_escape(&step.title),
                    step.order
                );
                let text = self
                    .summarize(
                        "goal.add_step",
                        &json!({"step": step.title, "order": step.order}),
                        &fallback,
                    )
                    .await;
                Ok(TurnResponse::text(text))
            }

            Intent::GoalDeleteStep { target, dry_run } => {
                let step_id = self.resolve(user_id, target, ResultKind::Steps).await?;
                let step = self
                    .store
                    .get_step(user_id, step_id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("step {}", step_id)))?;
                if dry_run {
                    let text = format!(
                        "Удалить шаг «{}»?",
                        crate::utils::html_escape(&step.title)
                    );
                    return Ok(TurnResponse::clarification(text)
                        .with_buttons(render::confirm_keyboard("delete_step", step_id)));
                }
                self.store
                    .delete_step(user_id, step_id)
                    .await
                    .map_err(CoreError::StoreTransient)?;
                let fallback = format!(
                    "Готово! Шаг «{}» удалён.",
                    crate::utils::html_escape(&step.title)
                );
                let text = self
                    .summarize("goal.delete_step", &json!({"deleted": step.title}), &fallback)
                    .await;
                Ok(TurnResponse::text(text))
            }

            Intent::ProductSearch { query, .. } => {
                // Reserved: no product data flow behind this intent yet.
                Ok(TurnResponse {
                    items: Some(vec![]),
                    ..TurnResponse::text(format!(
                        "Поиск товаров по запросу «{}» пока недоступен.",
                        crate::utils::html_escape(&query)
                    ))
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_event_mutate(
        &self,
        user: &UserProfile,
        op: MutateOp,
        title: Option<String>,
        date: Option<NaiveDate>,
        time: Option<chrono::NaiveTime>,
        duration_minutes: Option<i64>,
        target: Option<TargetRef>,
        dry_run: bool,
    ) -> Result<TurnResponse, CoreError> {
        let user_id = &user.user_id;
        match op {
            MutateOp::Create => {
                let title =
                    title.ok_or_else(|| CoreError::IntentInvalid("create requires title".into()))?;
                let date =
                    date.ok_or_else(|| CoreError::IntentInvalid("create requires date".into()))?;
                if dry_run {
                    return Ok(TurnResponse::clarification(format!(
                        "Создать событие «{}» на {}?",
                        crate::utils::html_escape(&title),
                        fmt_date_ru(date)
                    )));
                }
                let mut event = NewEvent::user_event(&title, date, time);
                if let Some(duration) = duration_minutes {
                    event.duration_minutes = duration;
                }
                let created = self
                    .store
                    .create_event(user_id, &event)
                    .await
                    .map_err(classify_anyhow_store)?;
                self.analytics
                    .emit(user_id, "event_created", json!({"event_id": created.id}));
                let when = match created.time {
                    Some(t) => format!("{} в {}", fmt_date_ru(created.date), fmt_time(t)),
                    None => fmt_date_ru(created.date),
                };
                let fallback = format!(
                    "Записал: «{}», {}.",
                    crate::utils::html_escape(&created.title),
                    when
                );
                let text = self
                    .summarize(
                        "event.mutate",
                        &json!({"op": "create", "title": created.title, "when": when}),
                        &fallback,
                    )
                    .await;
                Ok(TurnResponse::text(text))
            }
            MutateOp::Update => {
                let target = target
                    .ok_or_else(|| CoreError::IntentInvalid("update requires target".into()))?;
                let event_id = self.resolve(user_id, target, ResultKind::Events).await?;
                if dry_run {
                    return Ok(TurnResponse::clarification("Подтвердить изменение события?")
                        .with_buttons(render::confirm_keyboard("update_event", event_id)));
                }
                let patch = EventPatch {
                    title,
                    date,
                    time: time.map(Some),
                    duration_minutes,
                    notes: None,
                };
                let updated = self
                    .store
                    .update_event(user_id, event_id, &patch)
                    .await
                    .map_err(classify_anyhow_store)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("event {}", event_id)))?;
                let fallback = format!(
                    "Событие «{}» обновлено.",
                    crate::utils::html_escape(&updated.title)
                );
                let text = self
                    .summarize(
                        "event.mutate",
                        &json!({"op": "update", "title": updated.title}),
                        &fallback,
                    )
                    .await;
                Ok(TurnResponse::text(text))
            }
            MutateOp::Delete => {
                let target = target
                    .ok_or_else(|| CoreError::IntentInvalid("delete requires target".into()))?;
                let event_id = self.resolve(user_id, target, ResultKind::Events).await?;
                let event = self
                    .store
                    .get_event(user_id, event_id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("event {}", event_id)))?;
                if dry_run {
                    return Ok(TurnResponse::clarification(format!(
                        "Удалить событие «{}»?",
                        crate::utils::html_escape(&event.title)
                    ))
                    .with_buttons(render::confirm_keyboard("delete_event", event_id)));
                }
                self.store
                    .delete_event(user_id, event_id)
                    .await
                    .map_err(CoreError::StoreTransient)?;
                let fallback = format!(
                    "Событие «{}» удалено.",
                    crate::utils::html_escape(&event.title)
                );
                let text = self
                    .summarize(
                        "event.mutate",
                        &json!({"op": "delete", "title": event.title}),
                        &fallback,
                    )
                    .await;
                Ok(TurnResponse::text(text))
            }
        }
    }

    /// Resolve a target reference at execution time.
    async fn resolve(
        &self,
        user_id: &str,
        target: TargetRef,
        kind: ResultKind,
    ) -> Result<i64, CoreError> {
        match target {
            TargetRef::Id(id) => Ok(id),
            TargetRef::Ordinal { set_id, ordinal } => self
                .resultsets
                .resolve(user_id, set_id, ordinal, kind)
                .await
                .map_err(|e| match e {
                    ResolveError::OrdinalOutOfRange(len) => {
                        CoreError::UnknownEntity(format!("ordinal {} of {}", ordinal, len))
                    }
                    _ => CoreError::UnknownEntity(format!("set {}", set_id)),
                }),
        }
    }

    // ---- goal creation flow (component D + E) ----

    async fn goal_create_flow(
        &self,
        user: &UserProfile,
        draft: GoalDraft,
    ) -> Result<TurnResponse, CoreError> {
        match smart_check(&draft) {
            Err(issue) => {
                let ctx = DialogContext {
                    draft: Some(draft),
                    ..Default::default()
                };
                self.set_state(&user.user_id, DialogState::GoalClarification, &ctx)
                    .await?;
                Ok(TurnResponse::clarification(issue.question()))
            }
            Ok(()) => self.create_goal_and_ask_days(user, draft).await,
        }
    }

    async fn create_goal_and_ask_days(
        &self,
        user: &UserProfile,
        draft: GoalDraft,
    ) -> Result<TurnResponse, CoreError> {
        let steps = planner::decompose(self.model.as_ref(), &draft, self.temperature).await;
        let gws = self
            .store
            .create_goal_with_steps(&user.user_id, &draft, &steps)
            .await
            .map_err(classify_anyhow_store)?;
        self.analytics.emit(
            &user.user_id,
            "goal_created",
            json!({"goal_id": gws.goal.id, "steps": gws.steps.len()}),
        );

        let ctx = DialogContext {
            goal_id: Some(gws.goal.id),
            ..Default::default()
        };
        self.set_state(&user.user_id, DialogState::SchedulePrefsDays, &ctx)
            .await?;

        let text = format!(
            "Цель «{}» создана, в плане {} шагов!\n\nВ какие дни недели тебе удобно заниматься?",
            crate::utils::html_escape(&gws.goal.title),
            gws.steps.len()
        );
        Ok(TurnResponse::clarification(text).with_buttons(render::weekday_keyboard(&[])))
    }

    /// Finish the preference flow: run the scheduler and go idle.
    async fn complete_scheduling(
        &self,
        user: &UserProfile,
        ctx: &DialogContext,
        preferred_time: chrono::NaiveTime,
    ) -> Result<TurnResponse, CoreError> {
        let goal_id = ctx
            .goal_id
            .ok_or_else(|| CoreError::IntentInvalid("no goal in scheduling context".into()))?;
        let prefs = SchedulingPrefs {
            weekdays: ctx.days.clone(),
            preferred_time,
        };

        self.set_state(&user.user_id, DialogState::Idle, &DialogContext::default())
            .await?;

        match planner::schedule_goal(self.store.as_ref(), user, goal_id, &prefs).await {
            Ok(outcome) if outcome.already_scheduled => {
                Ok(TurnResponse::text("Эта цель уже в расписании."))
            }
            Ok(outcome) => {
                self.analytics.emit(
                    &user.user_id,
                    "goal_scheduled",
                    json!({"goal_id": goal_id, "events": outcome.events.len()}),
                );
                let Some(first) = outcome.placements.first() else {
                    return Ok(TurnResponse::text(
                        "Цель сохранена, но планировать пока нечего — добавь шаги.",
                    ));
                };
                let mut text = format!(
                    "Расписание готово: {} занятий добавлено в календарь, первое — {} в {}.",
                    outcome.placements.len(),
                    fmt_date_ru(first.date),
                    fmt_time(first.time),
                );
                if outcome.tight_deadline {
                    text.push_str(
                        "\n\n⚠️ <i>Сроки поджимают: часть занятий выпала после дедлайна. \
                         Подумай о том, чтобы добавить дни или сдвинуть дату.</i>",
                    );
                }
                Ok(TurnResponse::text(text))
            }
            Err(CoreError::PlacementFailed(reason)) => {
                warn!(goal_id, "placement failed: {}", reason);
                Ok(TurnResponse::text(
                    CoreError::PlacementFailed(reason).user_reply().unwrap(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    // ---- free-text consumption in non-idle states ----

    async fn consume_free_text(
        &self,
        user: &UserProfile,
        state: DialogState,
        mut ctx: DialogContext,
        text: &str,
    ) -> Result<TurnResponse, CoreError> {
        let user_id = &user.user_id;
        match state {
            DialogState::GoalClarification => {
                let mut draft = ctx.draft.take().unwrap_or_default();
                merge_clarification(&mut draft, text);
                match smart_check(&draft) {
                    Err(issue) => {
                        let ctx = DialogContext {
                            draft: Some(draft),
                            ..Default::default()
                        };
                        self.set_state(user_id, DialogState::GoalClarification, &ctx)
                            .await?;
                        Ok(TurnResponse::clarification(issue.question()))
                    }
                    Ok(()) => self.create_goal_and_ask_days(user, draft).await,
                }
            }

            DialogState::GoalEdit(field) => {
                let goal_id = ctx
                    .edit_id
                    .ok_or_else(|| CoreError::IntentInvalid("no goal in edit context".into()))?;
                let patch = goal_patch_from_text(field, text)?;
                let updated = self
                    .store
                    .update_goal(user_id, goal_id, &patch)
                    .await
                    .map_err(classify_anyhow_store)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("goal {}", goal_id)))?;
                self.set_state(user_id, DialogState::Idle, &DialogContext::default())
                    .await?;
                Ok(TurnResponse::text(format!(
                    "Обновил цель «{}».",
                    crate::utils::html_escape(&updated.title)
                )))
            }

            DialogState::EventEdit(field) => {
                let event_id = ctx
                    .edit_id
                    .ok_or_else(|| CoreError::IntentInvalid("no event in edit context".into()))?;
                let patch = event_patch_from_text(field, text)?;
                let updated = self
                    .store
                    .update_event(user_id, event_id, &patch)
                    .await
                    .map_err(classify_anyhow_store)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("event {}", event_id)))?;
                self.set_state(user_id, DialogState::Idle, &DialogContext::default())
                    .await?;
                Ok(TurnResponse::text(format!(
                    "Обновил событие «{}».",
                    crate::utils::html_escape(&updated.title)
                )))
            }

            DialogState::StepEdit(field) => {
                let step_id = ctx
                    .edit_id
                    .ok_or_else(|| CoreError::IntentInvalid("no step in edit context".into()))?;
                let patch = step_patch_from_text(field, text)?;
                let updated = self
                    .store
                    .update_step(user_id, step_id, &patch)
                    .await
                    .map_err(classify_anyhow_store)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("step {}", step_id)))?;
                self.set_state(user_id, DialogState::Idle, &DialogContext::default())
                    .await?;
                Ok(TurnResponse::text(format!(
                    "Обновил шаг «{}».",
                    crate::utils::html_escape(&updated.title)
                )))
            }

            DialogState::SchedulePrefsTime => match parse_time(text) {
                Some(time) => self.complete_scheduling(user, &ctx, time).await,
                None => Ok(TurnResponse::clarification(
                    "Не понял время. Выбери кнопку или напиши в формате ЧЧ:ММ, например 18:00.",
                )
                .with_buttons(render::time_pref_keyboard())),
            },

            _ => Err(CoreError::IntentInvalid(format!(
                "state {} does not consume free text",
                state.as_str()
            ))),
        }
    }

    // ---- callback path ----

    async fn callback_turn(
        &self,
        user_id: &str,
        callback_data: &str,
        hints: &TurnHints,
    ) -> Result<TurnResponse, CoreError> {
        let user = self.load_user(user_id, hints).await?;
        let session = self.load_session(user_id).await?;
        let state = DialogState::parse(&session.state).unwrap_or_default();
        let mut ctx = DialogContext::from_value(&session.context);

        let callback = Callback::parse(callback_data).ok_or_else(|| {
            CoreError::IntentInvalid(format!("unknown callback '{}'", callback_data))
        })?;
        self.analytics
            .emit(user_id, "callback_received", json!({"data": callback_data}));

        match callback {
            Callback::Cancel => {
                self.set_state(user_id, DialogState::Idle, &DialogContext::default())
                    .await?;
                Ok(TurnResponse::text("Окей, отменил. Чем ещё помочь?"))
            }

            Callback::EditGoal { field, id } => {
                self.ensure_goal_exists(user_id, id).await?;
                let ctx = DialogContext {
                    edit_id: Some(id),
                    ..Default::default()
                };
                self.set_state(user_id, DialogState::GoalEdit(field), &ctx)
                    .await?;
                Ok(TurnResponse::clarification(goal_edit_prompt(field)))
            }

            Callback::EditEvent { field, id } => {
                self.store
                    .get_event(user_id, id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("event {}", id)))?;
                let ctx = DialogContext {
                    edit_id: Some(id),
                    ..Default::default()
                };
                self.set_state(user_id, DialogState::EventEdit(field), &ctx)
                    .await?;
                Ok(TurnResponse::clarification(event_edit_prompt(field)))
            }

            Callback::EditStep { field, id } => {
                self.store
                    .get_step(user_id, id)
                    .await
                    .map_err(CoreError::StoreTransient)?
                    .ok_or_else(|| CoreError::UnknownEntity(format!("step {}", id)))?;
                let ctx = DialogContext {
                    edit_id: Some(id),
                    ..Default::default()
                };
                self.set_state(user_id, DialogState::StepEdit(field), &ctx)
                    .await?;
                Ok(TurnResponse::clarification(step_edit_prompt(field)))
            }

            Callback::DayPref(day) => {
                if state != DialogState::SchedulePrefsDays {
                    return Ok(TurnResponse::text(
                        "Сейчас я не выбираю дни. Создай цель, и я спрошу про расписание.",
                    ));
                }
                ctx.toggle_day(day);
                self.set_state(user_id, DialogState::SchedulePrefsDays, &ctx)
                    .await?;
                Ok(
                    TurnResponse::clarification("В какие дни недели тебе удобно заниматься?")
                        .with_buttons(render::weekday_keyboard(&ctx.days)),
                )
            }

            Callback::DayPrefDone => {
                if state != DialogState::SchedulePrefsDays {
                    return Ok(TurnResponse::text(
                        "Сейчас я не выбираю дни. Создай цель, и я спрошу про расписание.",
                    ));
                }
                if ctx.days.is_empty() {
                    return Ok(TurnResponse::clarification(
                        "Выбери хотя бы один день недели.",
                    )
                    .with_buttons(render::weekday_keyboard(&[])));
                }
                self.set_state(user_id, DialogState::SchedulePrefsTime, &ctx)
                    .await?;
                Ok(TurnResponse::clarification(
                    "В какое время тебе удобно заниматься?",
                )
                .with_buttons(render::time_pref_keyboard()))
            }

            Callback::TimePref(time) => {
                if state != DialogState::SchedulePrefsTime {
                    return Ok(TurnResponse::text(
                        "Сейчас я не выбираю время. Создай цель, и я спрошу про расписание.",
                    ));
                }
                ctx.preferred_time = Some(fmt_time(time));
                self.complete_scheduling(&user, &ctx, time).await
            }

            Callback::TimePrefDone => {
                if state != DialogState::SchedulePrefsTime {
                    return Ok(TurnResponse::text(
                        "Сейчас я не выбираю время. Создай цель, и я спрошу про расписание.",
                    ));
                }
                match ctx.preferred_time.as_deref().and_then(parse_time) {
                    Some(time) => self.complete_scheduling(&user, &ctx, time).await,
                    None => Ok(TurnResponse::clarification(
                        "Сначала выбери время — кнопкой или в формате ЧЧ:ММ.",
                    )
                    .with_buttons(render::time_pref_keyboard())),
                }
            }

            Callback::Confirm { op, id } => self.apply_confirm(&user, &op, id).await,
        }
    }

    async fn ensure_goal_exists(&self, user_id: &str, goal_id: i64) -> Result<(), CoreError> {
        self.store
            .get_goal(user_id, goal_id)
            .await
            .map_err(CoreError::StoreTransient)?
            .ok_or_else(|| CoreError::UnknownEntity(format!("goal {}", goal_id)))?;
        Ok(())
    }

    async fn apply_confirm(
        &self,
        user: &UserProfile,
        op: &str,
        id: i64,
    ) -> Result<TurnResponse, CoreError> {
        let user_id = &user.user_id;
        match op {
            "delete_goal" => {
                let deleted = self
                    .store
                    .delete_goal(user_id, id)
                    .await
                    .map_err(CoreError::StoreTransient)?;
                if !deleted {
                    return Err(CoreError::UnknownEntity(format!("goal {}", id)));
                }
                Ok(TurnResponse::text("Цель удалена вместе с шагами и событиями."))
            }
            "delete_step" => {
                let deleted = self
                    .store
                    .delete_step(user_id, id)
                    .await
                    .map_err(CoreError::StoreTransient)?;
                if !deleted {
                    return Err(CoreError::UnknownEntity(format!("step {}", id)));
                }
                Ok(TurnResponse::text("Шаг удалён."))
            }
            "delete_event" => {
                let deleted = self
                    .store
                    .delete_event(user_id, id)
                    .await
                    .map_err(CoreError::StoreTransient)?;
                if !deleted {
                    return Err(CoreError::UnknownEntity(format!("event {}", id)));
                }
                Ok(TurnResponse::text("Событие удалено."))
            }
            other => Err(CoreError::IntentInvalid(format!(
                "unknown confirm op '{}'",
                other
            ))),
        }
    }

    /// Second model call for the reply prose; deterministic fallback when the
    /// model is down or answers nonsense.
    async fn summarize(
        &self,
        intent_tag: &str,
        result: &serde_json::Value,
        fallback: &str,
    ) -> String {
        let request = ModelRequest {
            system: prompts::summarize(intent_tag, result),
            user: String::new(),
            temperature: self.temperature,
        };
        match self.model.complete(&request).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() || text.len() > 2000 {
                    fallback.to_string()
                } else {
                    crate::utils::html_escape(text)
                }
            }
            Err(e) => {
                warn!("summarizer unavailable, using fallback: {}", e);
                fallback.to_string()
            }
        }
    }
}

fn ru_status(status: crate::traits::StepStatus) -> &'static str {
    match status {
        crate::traits::StepStatus::Pending => "не начат",
        crate::traits::StepStatus::InProgress => "в процессе",
        crate::traits::StepStatus::Completed => "выполнен",
    }
}

/// Fold a clarification reply into the draft: dates and durations feed the
/// timeframe, everything else enriches the description.
fn merge_clarification(draft: &mut GoalDraft, text: &str) {
    let trimmed = text.trim();
    if let Some(date) = parse_date(trimmed) {
        draft.target_date = Some(date);
        return;
    }
    if draft.title.trim().chars().count() < 8 {
        draft.title = trimmed.to_string();
        return;
    }
    match &mut draft.description {
        Some(description) => {
            description.push_str(". ");
            description.push_str(trimmed);
        }
        None => draft.description = Some(trimmed.to_string()),
    }
}

fn goal_edit_prompt(field: GoalField) -> &'static str {
    match field {
        GoalField::Title => "Введи новое название цели:",
        GoalField::Description => "Введи новое описание цели:",
        GoalField::Deadline => "Введи новый дедлайн в формате ГГГГ-ММ-ДД:",
        GoalField::Category => "Введи категорию цели:",
        GoalField::Priority => "Укажи приоритет: low, medium или high.",
    }
}

fn event_edit_prompt(field: EventField) -> &'static str {
    match field {
        EventField::Title => "Введи новое название события:",
        EventField::Date => "Введи новую дату в формате ГГГГ-ММ-ДД:",
        EventField::Time => "Введи новое время в формате ЧЧ:ММ:",
        EventField::Duration => "Введи длительность в минутах:",
        EventField::Notes => "Введи заметку к событию:",
    }
}

fn step_edit_prompt(field: StepField) -> &'static str {
    match field {
        StepField::Title => "Введи новое название шага:",
        StepField::Date => "Введи новую дату шага в формате ГГГГ-ММ-ДД:",
        StepField::Time => "Введи новое время шага в формате ЧЧ:ММ:",
    }
}

fn goal_patch_from_text(field: GoalField, text: &str) -> Result<GoalPatch, CoreError> {
    let text = text.trim();
    let mut patch = GoalPatch::default();
    match field {
        GoalField::Title => {
            if text.chars().count() < 3 || text.chars().count() > 200 {
                return Err(CoreError::IntentInvalid("title must be 3-200 chars".into()));
            }
            patch.title = Some(text.to_string());
        }
        GoalField::Description => patch.description = Some(text.to_string()),
        GoalField::Deadline => {
            let date = parse_date(text)
                .ok_or_else(|| CoreError::IntentInvalid("deadline must be YYYY-MM-DD".into()))?;
            patch.target_date = Some(Some(date));
        }
        GoalField::Category => patch.category = Some(text.to_string()),
        GoalField::Priority => {
            let priority = Priority::parse(&text.to_lowercase())
                .ok_or_else(|| CoreError::IntentInvalid("priority must be low|medium|high".into()))?;
            patch.priority = Some(priority);
        }
    }
    Ok(patch)
}

fn event_patch_from_text(field: EventField, text: &str) -> Result<EventPatch, CoreError> {
    let text = text.trim();
    let mut patch = EventPatch::default();
    match field {
        EventField::Title => patch.title = Some(text.to_string()),
        EventField::Date => {
            let date = parse_date(text)
                .ok_or_else(|| CoreError::IntentInvalid("date must be YYYY-MM-DD".into()))?;
            patch.date = Some(date);
        }
        EventField::Time => {
            let time = parse_time(text)
                .ok_or_else(|| CoreError::IntentInvalid("time must be HH:MM".into()))?;
            patch.time = Some(Some(time));
        }
        EventField::Duration => {
            let minutes: i64 = text
                .parse()
                .map_err(|_| CoreError::IntentInvalid("duration must be a number".into()))?;
            if minutes <= 0 {
                return Err(CoreError::IntentInvalid("duration must be positive".into()));
            }
            patch.duration_minutes = Some(minutes);
        }
        EventField::Notes => patch.notes = Some(text.to_string()),
    }
    Ok(patch)
}

fn step_patch_from_text(field: StepField, text: &str) -> Result<StepPatch, CoreError> {
    let text = text.trim();
    let mut patch = StepPatch::default();
    match field {
        StepField::Title => {
            if text.is_empty() {
                return Err(CoreError::IntentInvalid("step title is empty".into()));
            }
            patch.title = Some(text.to_string());
        }
        StepField::Date => {
            let date = parse_date(text)
                .ok_or_else(|| CoreError::IntentInvalid("date must be YYYY-MM-DD".into()))?;
            patch.planned_date = Some(Some(date));
        }
        StepField::Time => {
            let time = parse_time(text)
                .ok_or_else(|| CoreError::IntentInvalid("time must be HH:MM".into()))?;
            patch.planned_time = Some(Some(time));
        }
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Datelike, Utc};

    use crate::adapters::NoopAnalyticsSink;
    use crate::state::SqliteStore;
    use crate::traits::{ConversationStore, EventStore, GoalStore, ModelError, SessionStore, UserStore};
    use crate::types::ResponseType;

    /// Scripted model: intent-parser calls pop from a queue, decomposition
    /// returns a fixed step list, the summarizer is always down so replies
    /// use their deterministic fallbacks.
    struct FakeModel {
        intent_replies: Mutex<VecDeque<String>>,
    }

    impl FakeModel {
        fn new() -> Self {
            Self {
                intent_replies: Mutex::new(VecDeque::new()),
            }
        }

        fn push_intent(&self, json: &str) {
            self.intent_replies.lock().unwrap().push_back(json.to_string());
        }
    }

    #[async_trait]
    impl ModelAdapter for FakeModel {
        async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
            if request.system.contains("Разбей цель") {
                return Ok(r#"[
                    {"title": "Выучить алфавит и произношение", "estimated_hours": 2.0, "order": 1},
                    {"title": "Набрать первые 200 слов", "estimated_hours": 4.0, "order": 2},
                    {"title": "Пройти базовую грамматику", "estimated_hours": 6.0, "order": 3}
                ]"#
                .to_string());
            }
            if request.system.contains("Сформулируй короткий ответ") {
                return Err(ModelError::Transport(anyhow::anyhow!("summarizer down")));
            }
            match self.intent_replies.lock().unwrap().pop_front() {
                Some(reply) => Ok(reply),
                None => Err(ModelError::Transport(anyhow::anyhow!("no scripted reply"))),
            }
        }
    }

    struct Harness {
        store: Arc<SqliteStore>,
        model: Arc<FakeModel>,
        orchestrator: Orchestrator,
    }

    async fn harness() -> Harness {
        let config: AppConfig = toml::from_str(
            r#"
            model_adapter_url = "http://localhost:9000"
            store_dsn = "sqlite::memory:"
            transport_api_token = "t"
        "#,
        )
        .unwrap();
        let store = Arc::new(SqliteStore::in_memory().await);
        let model = Arc::new(FakeModel::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            model.clone(),
            None,
            Arc::new(NoopAnalyticsSink),
            &config,
        );
        Harness {
            store,
            model,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn goal_creation_flow_runs_clarification_prefs_and_scheduling() {
        let h = harness().await;

        // The duration mention satisfies the SMART timeframe check.
        h.model.push_intent(
            r#"{"intent": "goal.create", "title": "Выучить испанский",
                "description": "за 3 месяца, 3 часа в неделю", "time_commitment": 180}"#,
        );
        let response = h
            .orchestrator
            .process_message("u1", "хочу выучить испанский за 3 месяца, 3 часа в неделю", &TurnHints::default())
            .await;
        assert!(response.success, "{:?}", response.error);
        assert_eq!(response.response_type, ResponseType::AskClarification);
        let buttons = response.buttons.as_ref().unwrap();
        assert!(buttons
            .iter()
            .flatten()
            .any(|b| b.callback_data == "day_pref:0"));

        // Goal persisted with the decomposed steps, unscheduled.
        let goals = h.store.list_goals("u1", None).await.unwrap();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].title, "Выучить испанский");
        assert!(!goals[0].is_scheduled);
        let gws = h
            .store
            .get_goal_with_steps("u1", goals[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gws.steps.len(), 3);

        // Pick Mon/Wed/Fri.
        for day in ["day_pref:0", "day_pref:2", "day_pref:4"] {
            let response = h
                .orchestrator
                .process_callback("u1", day, &TurnHints::default())
                .await;
            assert!(response.success);
        }
        let response = h
            .orchestrator
            .process_callback("u1", "day_pref_done", &TurnHints::default())
            .await;
        assert_eq!(response.response_type, ResponseType::AskClarification);
        assert!(response
            .buttons
            .as_ref()
            .unwrap()
            .iter()
            .flatten()
            .any(|b| b.callback_data == "time_pref:evening"));

        // Evening preference completes scheduling.
        let response = h
            .orchestrator
            .process_callback("u1", "time_pref:evening", &TurnHints::default())
            .await;
        assert!(response.success, "{:?}", response.error);
        assert!(response.text.contains("Расписание готово"));

        let gws = h
            .store
            .get_goal_with_steps("u1", goals[0].id)
            .await
            .unwrap()
            .unwrap();
        assert!(gws.goal.is_scheduled);
        for step in &gws.steps {
            let date = step.planned_date.expect("planned");
            let weekday = date.weekday().num_days_from_monday() as u8;
            assert!([0u8, 2, 4].contains(&weekday), "weekday {}", weekday);
            assert!(step.planned_time.unwrap() >= parse_time("18:00").unwrap());
            let event_id = step.linked_event_id.expect("linked event");
            let event = h.store.get_event("u1", event_id).await.unwrap().unwrap();
            assert_eq!(event.linked_step_id, Some(step.id));
        }

        // Flow is back to idle.
        let session = h.store.get_session("u1").await.unwrap();
        assert_eq!(session.state, "idle");
    }

    #[tokio::test]
    async fn vague_goal_enters_clarification_and_recovers() {
        let h = harness().await;

        h.model
            .push_intent(r#"{"intent": "goal.create", "title": "Стать лучше"}"#);
        let response = h
            .orchestrator
            .process_message("u1", "хочу стать лучше", &TurnHints::default())
            .await;
        assert_eq!(response.response_type, ResponseType::AskClarification);
        let session = h.store.get_session("u1").await.unwrap();
        assert_eq!(session.state, "goal_clarification");

        // The follow-up message is consumed by the flow, not the parser.
        let response = h
            .orchestrator
            .process_message(
                "u1",
                "Выучить испанский язык за 3 месяца",
                &TurnHints::default(),
            )
            .await;
        assert!(response.success);
        assert_eq!(response.response_type, ResponseType::AskClarification);
        let session = h.store.get_session("u1").await.unwrap();
        assert_eq!(session.state, "schedule_prefs_days");
        assert_eq!(h.store.list_goals("u1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ordinal_delete_hits_the_second_listed_event() {
        let h = harness().await;
        h.store.get_or_create_user("u1", 1, "UTC").await.unwrap();
        let mut ids = Vec::new();
        for (title, date) in [
            ("первое", "2026-08-10"),
            ("второе", "2026-08-11"),
            ("третье", "2026-08-12"),
        ] {
            let event = h
                .store
                .create_event(
                    "u1",
                    &NewEvent::user_event(title, parse_date(date).unwrap(), parse_time("10:00")),
                )
                .await
                .unwrap();
            ids.push(event.id);
        }

        h.model.push_intent(r#"{"intent": "event.search"}"#);
        let response = h
            .orchestrator
            .process_message("u1", "покажи события", &TurnHints::default())
            .await;
        assert_eq!(response.response_type, ResponseType::RenderTable);
        let set_id = response.set_id.unwrap();
        assert_eq!(response.items.as_ref().unwrap().len(), 3);

        h.model.push_intent(&format!(
            r#"{{"intent": "event.mutate", "op": "delete", "set_id": "{}", "ordinal": 2}}"#,
            set_id
        ));
        let response = h
            .orchestrator
            .process_message("u1", "удали второе", &TurnHints::default())
            .await;
        assert!(response.success, "{:?}", response.error);
        assert_eq!(response.response_type, ResponseType::FinalText);
        assert!(response.text.contains("удалено"), "{}", response.text);

        assert!(h.store.get_event("u1", ids[1]).await.unwrap().is_none());
        let remaining = h
            .store
            .search_events("u1", &EventFilter::default())
            .await
            .unwrap();
        let remaining_ids: Vec<i64> = remaining.iter().map(|e| e.id).collect();
        assert_eq!(remaining_ids, vec![ids[0], ids[2]]);
    }

    #[tokio::test]
    async fn stale_edit_state_resets_before_handling() {
        let h = harness().await;
        h.store.get_or_create_user("u1", 1, "UTC").await.unwrap();
        let gws = h
            .store
            .create_goal_with_steps(
                "u1",
                &GoalDraft {
                    title: "Старое название цели".into(),
                    ..Default::default()
                },
                &[],
            )
            .await
            .unwrap();

        let ctx = DialogContext {
            edit_id: Some(gws.goal.id),
            ..Default::default()
        };
        h.store
            .set_session("u1", "goal_edit_title", &ctx.to_value())
            .await
            .unwrap();
        // Backdate past the 30-minute window.
        let past = (Utc::now() - chrono::Duration::minutes(31)).to_rfc3339();
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE user_id = 'u1'")
            .bind(&past)
            .execute(h.store.pool())
            .await
            .unwrap();

        h.model.push_intent(r#"{"intent": "goal.search"}"#);
        let response = h
            .orchestrator
            .process_message("u1", "показать цели", &TurnHints::default())
            .await;
        assert!(response.success);
        assert_eq!(response.response_type, ResponseType::RenderTable);

        // The message was NOT consumed as a new title.
        let goal = h.store.get_goal("u1", gws.goal.id).await.unwrap().unwrap();
        assert_eq!(goal.title, "Старое название цели");
        let session = h.store.get_session("u1").await.unwrap();
        assert_eq!(session.state, "idle");
    }

    #[tokio::test]
    async fn fresh_edit_state_consumes_the_next_message() {
        let h = harness().await;
        h.store.get_or_create_user("u1", 1, "UTC").await.unwrap();
        let gws = h
            .store
            .create_goal_with_steps(
                "u1",
                &GoalDraft {
                    title: "Старое название".into(),
                    ..Default::default()
                },
                &[],
            )
            .await
            .unwrap();

        let response = h
            .orchestrator
            .process_callback(
                "u1",
                &format!("edit:goal:title:{}", gws.goal.id),
                &TurnHints::default(),
            )
            .await;
        assert_eq!(response.response_type, ResponseType::AskClarification);

        let response = h
            .orchestrator
            .process_message("u1", "Совсем новое название", &TurnHints::default())
            .await;
        assert!(response.success);
        let goal = h.store.get_goal("u1", gws.goal.id).await.unwrap().unwrap();
        assert_eq!(goal.title, "Совсем новое название");
        assert_eq!(h.store.get_session("u1").await.unwrap().state, "idle");
    }

    #[tokio::test]
    async fn cancel_discards_context_from_any_state() {
        let h = harness().await;
        h.store.get_or_create_user("u1", 1, "UTC").await.unwrap();
        h.store
            .set_session(
                "u1",
                "schedule_prefs_days",
                &serde_json::json!({"goal_id": 5, "days": [0]}),
            )
            .await
            .unwrap();

        let response = h
            .orchestrator
            .process_callback("u1", "cancel", &TurnHints::default())
            .await;
        assert!(response.success);
        assert!(response.text.contains("отменил"));
        let session = h.store.get_session("u1").await.unwrap();
        assert_eq!(session.state, "idle");
        assert_eq!(session.context, serde_json::json!({}));
    }

    #[tokio::test]
    async fn unknown_callback_token_is_rejected_politely() {
        let h = harness().await;
        let response = h
            .orchestrator
            .process_callback("u1", "fire_missiles:1", &TurnHints::default())
            .await;
        assert!(!response.success);
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn unparseable_model_output_yields_clarification_reply() {
        let h = harness().await;
        // Both attempts return prose without JSON.
        h.model.push_intent("не понимаю");
        h.model.push_intent("всё ещё не понимаю");
        let response = h
            .orchestrator
            .process_message("u1", "сделай что-нибудь", &TurnHints::default())
            .await;
        assert!(!response.success);
        assert!(response.text.contains("переформулировать"));
    }

    #[tokio::test]
    async fn small_talk_uses_the_reply_hint_directly() {
        let h = harness().await;
        h.model.push_intent(
            r#"{"intent": "small_talk", "reply_hint": "Привет! Чем займёмся сегодня?"}"#,
        );
        let response = h
            .orchestrator
            .process_message("u1", "привет", &TurnHints::default())
            .await;
        assert!(response.success);
        assert_eq!(response.text, "Привет! Чем займёмся сегодня?");

        // Both turns landed in the conversation window.
        let history = h.store.recent_messages("u1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].intent.as_deref(), Some("small_talk"));
    }
}

//! Notification scheduler (component F): four periodic jobs scanning the
//! store per user, firing in each user's local zone, deduplicated by a
//! `(user, job, key, local date)` tuple and throttled by a global token
//! bucket. Jobs collect messages; the notifier owns sending and carries
//! anything over the rate limit into the next tick.

mod event_reminders;
mod goal_deadlines;
mod motivation;
mod rate;
mod step_reminders;

pub use rate::TokenBucket;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::traits::store_prelude::*;
use crate::traits::{AnalyticsSink, Store, Transport, UserProfile};

/// Local fire times for the daily jobs.
const GOAL_DEADLINE_HOUR: u32 = 9;
const STEP_REMINDER_HOUR: u32 = 20;
const MOTIVATION_HOUR: u32 = 8;

/// One message waiting to go out through the transport.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub user_id: String,
    pub chat_id: i64,
    pub html: String,
}

pub struct Notifier {
    store: Arc<dyn Store + Send + Sync>,
    transport: Arc<dyn Transport>,
    analytics: Arc<dyn AnalyticsSink>,
    bucket: Mutex<TokenBucket>,
    deferred: Mutex<VecDeque<Outbound>>,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        transport: Arc<dyn Transport>,
        analytics: Arc<dyn AnalyticsSink>,
        rate_per_s: u32,
    ) -> Self {
        Self {
            store,
            transport,
            analytics,
            bucket: Mutex::new(TokenBucket::new(rate_per_s)),
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    /// Start the minute tick loop as a background task.
    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = self.tick(Utc::now()).await {
                    error!("notifier tick failed: {:#}", e);
                }
            }
        });
        info!("notification scheduler spawned");
    }

    /// One scheduler pass. Failures inside a job are logged and skipped; the
    /// next tick re-evaluates.
    pub async fn tick(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let users = self.store.all_users().await?;

        let mut fresh = Vec::new();
        for user in &users {
            if !user.notifications_enabled {
                continue;
            }
            match self.collect_for_user(user, now).await {
                Ok(mut messages) => fresh.append(&mut messages),
                Err(e) => warn!(user_id = %user.user_id, "notification scan failed: {:#}", e),
            }
        }

        self.enqueue(fresh).await;
        self.drain(now).await;
        Ok(())
    }

    async fn collect_for_user(
        &self,
        user: &UserProfile,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Outbound>> {
        let local_now = now.with_timezone(&user.tz());
        let mut messages = Vec::new();

        if user.event_reminders_enabled {
            messages
                .extend(event_reminders::collect(self.store.as_ref(), user, now).await?);
        }
        if user.goal_deadline_warnings_enabled && local_now.hour() == GOAL_DEADLINE_HOUR {
            messages
                .extend(goal_deadlines::collect(self.store.as_ref(), user, local_now).await?);
        }
        if user.step_reminders_enabled && local_now.hour() == STEP_REMINDER_HOUR {
            messages
                .extend(step_reminders::collect(self.store.as_ref(), user, local_now).await?);
        }
        if user.motivational_messages_enabled && local_now.hour() == MOTIVATION_HOUR {
            messages.extend(motivation::collect(self.store.as_ref(), user, local_now).await?);
        }

        Ok(messages)
    }

    async fn enqueue(&self, messages: Vec<Outbound>) {
        if messages.is_empty() {
            return;
        }
        let mut deferred = self.deferred.lock().await;
        deferred.extend(messages);
    }

    /// Send queued messages as the token bucket allows; the rest wait for
    /// the next tick.
    async fn drain(&self, now: DateTime<Utc>) {
        loop {
            let next = {
                let mut deferred = self.deferred.lock().await;
                let Some(front) = deferred.front().cloned() else {
                    break;
                };
                let mut bucket = self.bucket.lock().await;
                if !bucket.try_acquire(now) {
                    info!(queued = deferred.len(), "send rate exhausted, deferring to next tick");
                    break;
                }
                deferred.pop_front();
                front
            };

            // Delivery failures are dropped after the transport's own retry;
            // notifications are not guaranteed.
            match self.transport.send(next.chat_id, &next.html, None).await {
                Ok(()) => {
                    self.analytics.emit(
                        &next.user_id,
                        "notification_sent",
                        serde_json::json!({"chars": next.html.len()}),
                    );
                }
                Err(e) => {
                    warn!(user_id = %next.user_id, "notification dropped: {:#}", e);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    pub struct RecordingTransport {
        pub sent: StdMutex<Vec<(i64, String)>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            chat_id: i64,
            html_text: &str,
            _keyboard: Option<&crate::types::Keyboard>,
        ) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((chat_id, html_text.to_string()));
            Ok(())
        }
    }
}

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;

use crate::traits::AnalyticsSink;

/// Fire-and-forget analytics over HTTP. Events go through a bounded channel
/// to a background sender; a full channel or a failed POST drops the event
/// with a debug log, never the turn.
pub struct HttpAnalyticsSink {
    tx: mpsc::Sender<serde_json::Value>,
}

impl HttpAnalyticsSink {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<serde_json::Value>(256);
        let url = format!("{}/track", base_url.trim_end_matches('/'));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = client.post(&url).json(&event).send().await {
                    tracing::debug!("analytics event dropped: {}", e);
                }
            }
        });

        Self { tx }
    }
}

impl AnalyticsSink for HttpAnalyticsSink {
    fn emit(&self, user_id: &str, event: &str, properties: serde_json::Value) {
        let payload = json!({
            "user_id": user_id,
            "event": event,
            "properties": properties,
        });
        if self.tx.try_send(payload).is_err() {
            tracing::debug!(event, "analytics queue full, event dropped");
        }
    }
}

/// Sink used when no analytics endpoint is configured.
pub struct NoopAnalyticsSink;

impl AnalyticsSink for NoopAnalyticsSink {
    fn emit(&self, _user_id: &str, _event: &str, _properties: serde_json::Value) {}
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::traits::{ModelAdapter, ModelError, ModelRequest};

/// Backoff for transient transport failures. Timeouts are never retried —
/// the pipeline surfaces them as `IntentTimeout` right away.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(200), Duration::from_secs(1)];

/// HTTP client for the language model adapter service.
///
/// Contract: `POST {base}/complete` with `{system, user, temperature}`,
/// answered by `{"text": "..."}`.
pub struct HttpModelAdapter {
    client: Client,
    base_url: String,
}

impl HttpModelAdapter {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call_once(&self, body: &Value) -> Result<String, ModelError> {
        let url = format!("{}/complete", self.base_url);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Transport(anyhow::Error::new(e))
            }
        })?;
        let response = response
            .error_for_status()
            .map_err(|e| ModelError::Transport(anyhow::Error::new(e)))?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Transport(anyhow::Error::new(e)))?;
        value
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ModelError::Transport(anyhow::anyhow!("adapter reply missing 'text'")))
    }
}

#[async_trait]
impl ModelAdapter for HttpModelAdapter {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let body = json!({
            "system": request.system,
            "user": request.user,
            "temperature": request.temperature,
        });

        let mut delays = RETRY_DELAYS.iter();
        loop {
            match self.call_once(&body).await {
                Ok(text) => return Ok(text),
                Err(ModelError::Timeout) => return Err(ModelError::Timeout),
                Err(transient) => match delays.next() {
                    Some(delay) => {
                        tracing::debug!("model call failed, retrying: {}", transient);
                        tokio::time::sleep(*delay).await;
                    }
                    None => return Err(transient),
                },
            }
        }
    }
}

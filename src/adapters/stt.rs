use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};

use super::with_retry;
use crate::traits::SpeechToText;

/// HTTP client for the speech-to-text adapter: `POST {base}/transcribe`
/// with base64 audio, answered by `{"text": "..."}`.
pub struct HttpSpeechToText {
    client: Client,
    base_url: String,
}

impl HttpSpeechToText {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, audio: &[u8]) -> anyhow::Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(audio);
        let body = json!({ "audio_b64": encoded });
        let url = format!("{}/transcribe", self.base_url);

        with_retry(|| {
            let body = body.clone();
            let url = url.clone();
            async move {
                let value: Value = self
                    .client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                value
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("transcription reply missing 'text'"))
            }
        })
        .await
    }
}

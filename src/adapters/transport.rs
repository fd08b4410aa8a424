use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::with_retry;
use crate::traits::Transport;
use crate::types::Keyboard;

/// HTTP client for the chat gateway: `POST {base}/send` with
/// `{chat_id, text, parse_mode, buttons}` under a bearer token.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        chat_id: i64,
        html_text: &str,
        keyboard: Option<&Keyboard>,
    ) -> anyhow::Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": html_text,
            "parse_mode": "HTML",
            "buttons": keyboard,
        });
        let url = format!("{}/send", self.base_url);

        with_retry(|| {
            let body = body.clone();
            let url = url.clone();
            async move {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_token)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            }
        })
        .await
    }
}

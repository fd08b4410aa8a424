use async_trait::async_trait;
use thiserror::Error;

/// One prompt exchange sent to the language model adapter.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

#[derive(Debug, Error)]
pub enum ModelError {
    /// The adapter did not answer within the configured timeout.
    #[error("model call timed out")]
    Timeout,

    /// Transport or protocol failure talking to the adapter.
    #[error("model call failed: {0}")]
    Transport(#[source] anyhow::Error),
}

/// The language model adapter. Given a prompt pair it returns raw text;
/// parsing and validation of that text stays on the caller's side.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

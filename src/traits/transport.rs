use async_trait::async_trait;

use crate::types::Keyboard;

/// Outbound side of the chat transport: `(chat_id, html, keyboard)`.
///
/// The HTML is restricted to the `<b> <i> <code> <pre>` subset; the gateway
/// on the other side renders inline keyboards from the button rows.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        chat_id: i64,
        html_text: &str,
        keyboard: Option<&Keyboard>,
    ) -> anyhow::Result<()>;
}

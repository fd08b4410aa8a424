use async_trait::async_trait;

/// Speech-to-text adapter: audio bytes in, transcript out.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> anyhow::Result<String>;
}

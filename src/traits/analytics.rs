/// Fire-and-forget analytics emission. Implementations must not block the
/// calling turn; failures are logged and dropped.
pub trait AnalyticsSink: Send + Sync {
    fn emit(&self, user_id: &str, event: &str, properties: serde_json::Value);
}

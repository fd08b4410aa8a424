//! Outbound adapters: everything the core talks to over the network lives
//! behind the traits in `crate::traits`; these are the HTTP implementations
//! plus the fakes-friendly retry helper they share.

mod analytics;
mod model;
mod stt;
mod transport;

pub use analytics::{HttpAnalyticsSink, NoopAnalyticsSink};
pub use model::HttpModelAdapter;
pub use stt::HttpSpeechToText;
pub use transport::HttpTransport;

use std::future::Future;
use std::time::Duration;

/// Backoff schedule for transient I/O failures. Shape errors (bad JSON, 4xx)
/// must not be retried by callers.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(200), Duration::from_secs(1)];

pub(crate) async fn with_retry<T, F, Fut>(op: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_err = None;
    for (attempt, delay) in std::iter::once(None)
        .chain(RETRY_DELAYS.iter().copied().map(Some))
        .enumerate()
    {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(attempt, "transient call failed: {:#}", e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

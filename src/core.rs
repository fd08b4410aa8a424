use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::adapters::{
    HttpAnalyticsSink, HttpModelAdapter, HttpSpeechToText, HttpTransport, NoopAnalyticsSink,
};
use crate::config::AppConfig;
use crate::error::CoreError;
use crate::notify::Notifier;
use crate::orchestrator::Orchestrator;
use crate::server::{self, AppState};
use crate::state::SqliteStore;
use crate::traits::{AnalyticsSink, SpeechToText};

pub async fn run(config: AppConfig) -> Result<(), CoreError> {
    // 1. Store (fatal if unreachable).
    let store = Arc::new(
        SqliteStore::connect(
            &config.store_dsn,
            Duration::from_millis(config.store_timeout_ms),
        )
        .await?,
    );
    info!("store initialized ({})", config.store_dsn);

    // 2. Model adapter.
    let model = Arc::new(
        HttpModelAdapter::new(
            &config.model_adapter_url,
            Duration::from_millis(config.model_timeout_ms),
        )
        .map_err(|e| CoreError::Config(format!("model adapter: {}", e)))?,
    );
    info!("model adapter at {}", config.model_adapter_url);

    // 3. Transport client.
    let transport = Arc::new(
        HttpTransport::new(
            &config.transport_url,
            &config.transport_api_token,
            Duration::from_millis(config.transport_timeout_ms),
        )
        .map_err(|e| CoreError::Config(format!("transport client: {}", e)))?,
    );
    info!("transport gateway at {}", config.transport_url);

    // 4. Optional adapters.
    let stt: Option<Arc<dyn SpeechToText>> = match &config.stt_url {
        Some(url) => {
            info!("speech-to-text at {}", url);
            Some(Arc::new(
                HttpSpeechToText::new(url, Duration::from_millis(config.model_timeout_ms))
                    .map_err(|e| CoreError::Config(format!("stt client: {}", e)))?,
            ))
        }
        None => None,
    };
    let analytics: Arc<dyn AnalyticsSink> = match &config.analytics_url {
        Some(url) => {
            info!("analytics sink at {}", url);
            Arc::new(HttpAnalyticsSink::new(url, Duration::from_secs(5)))
        }
        None => Arc::new(NoopAnalyticsSink),
    };

    // 5. Orchestrator.
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        model,
        stt,
        analytics.clone(),
        &config,
    ));

    // 6. Notification scheduler.
    let notifier = Arc::new(Notifier::new(
        store.clone(),
        transport,
        analytics,
        config.notification_rate_per_s,
    ));
    notifier.spawn();

    // 7. HTTP surface (blocks).
    info!("strive core v{} starting", env!("CARGO_PKG_VERSION"));
    server::serve(
        AppState {
            orchestrator,
            store,
        },
        &config.listen_addr,
    )
    .await
    .map_err(|e| CoreError::Config(format!("server: {}", e)))
}

//! The HTTP surface: `/process` and `/callback` are the two ways into the
//! core; `/health` and `/ready` serve the process manager.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::orchestrator::Orchestrator;
use crate::state::SqliteStore;
use crate::types::{TurnHints, TurnResponse};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<SqliteStore>,
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    user_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    context: Option<TurnHints>,
}

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    user_id: String,
    callback_data: String,
    #[serde(default)]
    context: Option<TurnHints>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/process", post(process_handler))
        .route("/callback", post(callback_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

pub async fn serve(state: AppState, listen_addr: &str) -> anyhow::Result<()> {
    let app = router(state);
    info!("core listening on {}", listen_addr);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn process_handler(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Json<TurnResponse> {
    let hints = request.context.unwrap_or_default();
    let response = state
        .orchestrator
        .process_message(&request.user_id, &request.message, &hints)
        .await;
    Json(response)
}

async fn callback_handler(
    State(state): State<AppState>,
    Json(request): Json<CallbackRequest>,
) -> Json<TurnResponse> {
    let hints = request.context.unwrap_or_default();
    let response = state
        .orchestrator
        .process_callback(&request.user_id, &request.callback_data, &hints)
        .await;
    Json(response)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn ready_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.store.ping().await {
        Ok(()) => Json(json!({"ready": true})),
        Err(e) => {
            tracing::error!("readiness probe failed: {:#}", e);
            Json(json!({"ready": false}))
        }
    }
}

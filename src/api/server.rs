//! HTTP server setup: router and API routes.

use crate::health::HealthSnapshot;
use crate::relay::{self, RelayDeps};
use crate::WebhookEnvelope;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state for API handlers.
pub struct ApiState {
    pub deps: RelayDeps,
    pub started_at: std::time::Instant,
}

// -- Response types --

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: u64,
    tracked_notice_keys: usize,
    #[serde(flatten)]
    health: HealthSnapshot,
}

#[derive(Serialize)]
struct ResetResponse {
    status: &'static str,
}

/// Start the HTTP server on the given address.
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/webhook", post(webhook))
        .route("/reset", post(reset))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

// -- API handlers --

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Current health snapshot, including maintenance state.
async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let health = state.deps.health.snapshot();
    Json(StatusResponse {
        status: if health.maintenance {
            "maintenance"
        } else {
            "running"
        },
        uptime_seconds: state.started_at.elapsed().as_secs(),
        tracked_notice_keys: state.deps.dedup.tracked(),
        health,
    })
}

/// Webhook intake. Always acknowledges with 200 — the platform retries on
/// anything else and a redelivery storm helps nobody. Handling happens on a
/// detached task.
async fn webhook(State(state): State<Arc<ApiState>>, body: axum::body::Bytes) -> StatusCode {
    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(%error, "ignoring malformed webhook payload");
            return StatusCode::OK;
        }
    };

    if let Some(resource) = envelope.resource.as_deref() {
        if resource != "messages" {
            tracing::debug!(resource, "ignoring non-message webhook");
            return StatusCode::OK;
        }
    }

    let Some(event) = envelope.data else {
        tracing::debug!("webhook carried no message data");
        return StatusCode::OK;
    };

    tracing::info!(message_id = %event.id, room_id = %event.room_id, "webhook event received");
    tokio::spawn(relay::handle_event(state.deps.clone(), event));

    StatusCode::OK
}

/// Administrative reset of the health tracker and the notice dedup set.
async fn reset(State(state): State<Arc<ApiState>>) -> Json<ResetResponse> {
    state.deps.health.reset();
    state.deps.dedup.clear();
    tracing::info!("health state reset by administrator");
    Json(ResetResponse { status: "reset" })
}

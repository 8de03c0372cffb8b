use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio_util::sync::CancellationToken;

use tickd_api::{ConnectionState, IngestPhase, IngestStats};

#[derive(Clone)]
struct AppState {
    stats: Arc<IngestStats>,
}

/// Read-only status/health HTTP API over the pipeline snapshot.
pub async fn run(
    port: u16,
    stats: Arc<IngestStats>,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let app = Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/health", get(handle_health))
        .with_state(AppState { stats });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}

// --- GET /api/status ---

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.stats.snapshot()).into_response()
}

// --- GET /api/health ---

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let snap = state.stats.snapshot();
    let healthy = snap.phase == IngestPhase::Running
        && snap.connection_state == ConnectionState::Subscribed;
    if healthy {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response()
    }
}

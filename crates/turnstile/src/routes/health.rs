//! Health check endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Serialize;
use turnstile_common::MetricsSnapshot;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    platform: bool,
}

/// Readiness check (has the bot reached the platform yet?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    if state.is_ready() {
        Ok(Json(ReadyResponse {
            status: "ready",
            platform: true,
        }))
    } else {
        // Return 503 until the first successful poll
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    uptime_secs: u64,
    challenge_timeout_secs: u64,
    resolved_total: u64,
    #[serde(flatten)]
    sessions: MetricsSnapshot,
}

/// Metrics endpoint (for monitoring)
pub async fn metrics(
    State(state): State<AppState>,
) -> Json<MetricsResponse> {
    let sessions = state.gatekeeper.stats();
    Json(MetricsResponse {
        uptime_secs: state.uptime_secs(),
        challenge_timeout_secs: state.config.challenge.timeout_secs,
        resolved_total: sessions.resolved_total(),
        sessions,
    })
}

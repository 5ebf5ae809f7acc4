//! HTTP endpoints: relay credentials and health.

use axum::{Json, Router, extract::State, routing::get};
use duet_common::error::{DuetError, DuetResult};
use duet_common::ice::TurnCredentials;
use serde::Serialize;
use std::sync::Arc;

use crate::RelayState;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    sessions: usize,
}

pub fn router() -> Router<Arc<RelayState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/turn-config", get(turn_config))
}

async fn health_check(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        sessions: state.sessions.active_count().await,
    })
}

/// Hand out the configured TURN credentials.
async fn turn_config(State(state): State<Arc<RelayState>>) -> DuetResult<Json<TurnCredentials>> {
    let (username, credential) =
        state
            .turn
            .credentials()
            .ok_or_else(|| DuetError::ServiceUnavailable {
                service: "TURN credentials".into(),
            })?;

    tracing::debug!("Serving TURN credentials");
    Ok(Json(TurnCredentials {
        username,
        credential,
    }))
}

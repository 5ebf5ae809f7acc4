//! # duet-relay
//!
//! Signaling relay for duet calls. Handles:
//! - Client connections identified by user name
//! - Routing of `call/*` messages to every session of the addressed user
//! - Relay (TURN) credentials for clients behind restrictive NATs
//!
//! The relay never inspects SDP or candidates; it only checks who sent a
//! message and forwards it.

pub mod handler;
pub mod routes;
pub mod session;

use axum::{Router, routing::get};
use duet_common::config::{AppConfig, RelaySettings, TurnConfig};
use session::SessionManager;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Relay state shared by every connection and route.
pub struct RelayState {
    pub sessions: SessionManager,
    pub settings: RelaySettings,
    pub turn: TurnConfig,
    pub started_at: Instant,
}

impl RelayState {
    pub fn new(settings: RelaySettings, turn: TurnConfig) -> Self {
        if turn.credentials().is_none() {
            tracing::warn!("No TURN credentials configured; clients will use STUN only");
        }
        Self {
            sessions: SessionManager::new(),
            settings,
            turn,
            started_at: Instant::now(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.relay.clone(), config.turn.clone())
    }
}

/// Build the relay router: WebSocket endpoint plus HTTP routes.
pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/call", get(handler::ws_handler))
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(Arc::new(state))
}

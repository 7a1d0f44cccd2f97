use axum::extract::State;
use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub known_nodes: usize,
    pub online_nodes: usize,
    pub connected_agents: usize,
    pub monitors: usize,
}

/// GET /health -- service status plus inventory and connection counts.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        known_nodes: state.registry.node_count(),
        online_nodes: state
            .registry
            .online_count(Utc::now(), state.config.stale_after()),
        connected_agents: state.channel.connection_count(),
        monitors: state.monitors.len(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

//! Health check endpoint.

use axum::{Json, Router, extract::State, routing::get};
use docpulse_tunnel::TunnelPhase;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Where `/auth` takes its callback address from: `static` or `tunnel`.
    pub redirect_mode: &'static str,
    /// Tunnel phase, absent when no tunnel is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelPhase>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        redirect_mode: state.redirect_mode(),
        tunnel: state.tunnel.as_ref().map(|t| t.status().state),
    })
}

/// Create health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

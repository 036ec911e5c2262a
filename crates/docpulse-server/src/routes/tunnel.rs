//! Tunnel management endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use docpulse_tunnel::TunnelManager;
use serde::Deserialize;

use crate::error::{FailureResponse, Result, ServerError};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StartQuery {
    /// Local port to expose instead of the configured one.
    pub port: Option<u16>,
}

fn manager(state: &AppState) -> Result<&Arc<TunnelManager>> {
    state.tunnel.as_ref().ok_or(ServerError::TunnelDisabled)
}

/// GET /tunnel/start
pub async fn start(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<Json<serde_json::Value>> {
    let endpoint = manager(&state)?.start_on(query.port).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "public_url": endpoint.public_url,
        "redirect_uri": endpoint.redirect_uri,
        "message": "Tunnel active",
    })))
}

/// GET /tunnel/stop
pub async fn stop(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    manager(&state)?.stop().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Tunnel stopped",
    })))
}

/// GET /tunnel/status
pub async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let manager = manager(&state)?;
    let status = manager.status();
    let redirect_uri = manager.redirect_uri();
    Ok(Json(serde_json::json!({
        "success": true,
        "status": {
            "state": status.state,
            "public_url": status.public_url,
            "redirect_uri": redirect_uri,
            "port": status.local_port,
            "is_active": status.is_active(),
            "last_error": status.last_error,
        },
    })))
}

/// GET /tunnel/redirect-uri
///
/// The callback address that `/auth` would use right now.
pub async fn redirect_uri(State(state): State<AppState>) -> Response {
    match state.coordinator.resolver().resolve() {
        Ok(uri) => Json(serde_json::json!({
            "success": true,
            "redirect_uri": uri,
            "mode": state.redirect_mode(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(FailureResponse::new(e.to_string())),
        )
            .into_response(),
    }
}

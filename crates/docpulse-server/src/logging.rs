//! Request logging middleware.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ErrorCode;
use crate::state::AppState;

/// Log one line per request: route template, status, duration and, for failures, the
/// error code the handler reported.
///
/// The concrete URI is never logged. The callback query carries the authorization code
/// and the correlation value.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.request_logging {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "<unmatched>".to_owned());

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let status = response.status();
    let code = response.extensions().get::<ErrorCode>().map(|c| c.0);

    if status.is_server_error() {
        tracing::error!(%method, %route, status = status.as_u16(), elapsed_ms, code, "Request failed");
    } else if status.is_client_error() {
        tracing::warn!(%method, %route, status = status.as_u16(), elapsed_ms, code, "Request rejected");
    } else {
        tracing::info!(%method, %route, status = status.as_u16(), elapsed_ms, "Request served");
    }

    response
}

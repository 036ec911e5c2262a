//! Authorization endpoints.

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use docpulse_oauth::{SessionCredential, VerifiedSession};
use serde::{Deserialize, Serialize};

use crate::auth::{Unauthorized, bearer_token};
use crate::error::{FailureResponse, Result};
use crate::state::AppState;

/// Query parameters the provider appends to the callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set instead of `code` when the user refuses access.
    pub error: Option<String>,
}

/// Callback answer when no post-authorization redirect is configured.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub success: bool,
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: String,
}

/// GET /auth/status answer.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub authorized: bool,
    pub has_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

fn found(location: &str) -> Response {
    // 302 rather than axum's 303/307 helpers.
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

/// GET /auth
///
/// Begins an authorization attempt and redirects the browser to the provider.
pub async fn begin(State(state): State<AppState>) -> Result<Response> {
    let redirect = state.coordinator.begin_authorization()?;
    Ok(found(&redirect.url))
}

/// GET /auth/callback
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response> {
    let returned_state = query.state.as_deref().unwrap_or_default();

    if let Some(error) = query.error.as_deref() {
        return Err(state.coordinator.deny(returned_state, error).into());
    }

    // A missing code still consumes the pending attempt.
    let credential = state
        .coordinator
        .complete_authorization(query.code.as_deref().unwrap_or_default(), returned_state)
        .await?;

    Ok(deliver(&state, credential))
}

fn deliver(state: &AppState, credential: SessionCredential) -> Response {
    if let Some(target) = state.config.post_auth_redirect.as_deref() {
        let separator = if target.contains('?') { '&' } else { '?' };
        let location = format!(
            "{}{}token={}",
            target,
            separator,
            urlencoding::encode(&credential.token)
        );
        return found(&location);
    }

    let expires_in = credential.expires_in(state.issuer.now());
    Json(SessionResponse {
        success: true,
        token: credential.token,
        token_type: "Bearer".to_string(),
        expires_in,
        expires_at: credential.expires_at.to_rfc3339(),
    })
    .into_response()
}

/// GET /auth/status
///
/// No token is a plain "not authorized" answer; an unusable token is a 401 with the
/// verification reason.
pub async fn auth_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = match bearer_token(&headers) {
        Ok(Some(token)) => token,
        Ok(None) => {
            return Json(StatusResponse {
                authorized: false,
                has_token: false,
                expires_in: None,
                expires_at: None,
            })
            .into_response();
        }
        Err(rejection) => return rejection.into_response(),
    };

    match state.issuer.verify_session(token) {
        Ok(session) => Json(StatusResponse {
            authorized: true,
            has_token: true,
            expires_in: Some(session.expires_in(state.issuer.now())),
            expires_at: Some(session.expires_at.to_rfc3339()),
        })
        .into_response(),
        Err(e) => Unauthorized::Invalid(e).into_response(),
    }
}

/// GET /auth/logout
///
/// Tokens cannot be revoked server-side; the client discards its copy.
pub async fn logout() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "message": "Logged out. Discard the stored session token.",
    }))
}

/// GET /auth/user-info (behind the authorization middleware)
pub async fn user_info(
    State(state): State<AppState>,
    Extension(session): Extension<VerifiedSession>,
) -> Response {
    match state
        .coordinator
        .provider()
        .user_info(&session.upstream.access_token)
        .await
    {
        Ok(info) => Json(serde_json::json!({
            "success": true,
            "user_info": info,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Fetching user info failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(FailureResponse::new(e.to_string())),
            )
                .into_response()
        }
    }
}

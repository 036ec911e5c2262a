//! Session authorization middleware.
//!
//! Extracts the bearer session token, verifies it and injects the
//! [`VerifiedSession`] into request extensions for downstream handlers. Never mutates
//! shared state.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use docpulse_oauth::{SessionIssuer, TokenError, VerifiedSession};

use crate::error::ErrorCode;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Unauthorized
// ─────────────────────────────────────────────────────────────────────────────

/// Rejection for requests without a valid session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unauthorized {
    /// No Authorization header.
    MissingToken,
    /// A token was presented but failed verification.
    Invalid(TokenError),
}

impl Unauthorized {
    /// Reason reported to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            Unauthorized::MissingToken => "missing_token",
            Unauthorized::Invalid(e) => e.reason(),
        }
    }

    pub fn has_token(&self) -> bool {
        !matches!(self, Unauthorized::MissingToken)
    }
}

impl std::fmt::Display for Unauthorized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unauthorized::MissingToken => write!(f, "Missing session token"),
            Unauthorized::Invalid(TokenError::Expired) => {
                write!(f, "Session expired, authorize again")
            }
            Unauthorized::Invalid(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Unauthorized {}

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "authorized": false,
            "has_token": self.has_token(),
            "error": "unauthorized",
            "reason": self.reason(),
            "message": self.to_string(),
        });

        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response.extensions_mut().insert(ErrorCode(self.reason()));
        response
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Bearer token from the Authorization header.
///
/// `Ok(None)` when the header is absent. A header with any other scheme is a
/// malformed token.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, Unauthorized> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| Unauthorized::Invalid(TokenError::MalformedToken))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
            let token = token.trim();
            if token.is_empty() {
                return Err(Unauthorized::Invalid(TokenError::MalformedToken));
            }
            Ok(Some(token))
        }
        _ => Err(Unauthorized::Invalid(TokenError::MalformedToken)),
    }
}

/// Verify the request's session token.
pub fn authorize(
    headers: &HeaderMap,
    issuer: &SessionIssuer,
) -> Result<VerifiedSession, Unauthorized> {
    let token = bearer_token(headers)?.ok_or(Unauthorized::MissingToken)?;
    issuer.verify_session(token).map_err(Unauthorized::Invalid)
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Authorization middleware function.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Unauthorized> {
    let session = authorize(request.headers(), &state.issuer)?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

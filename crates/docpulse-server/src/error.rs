//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use docpulse_oauth::OAuthError;
use docpulse_tunnel::TunnelError;
use serde::Serialize;
use thiserror::Error;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Authorization flow failure.
    #[error(transparent)]
    Auth(#[from] OAuthError),

    /// Tunnel operation failure.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// Tunnel routes used while no tunnel is configured.
    #[error("Tunnel mode is not enabled")]
    TunnelDisabled,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Stable snake_case code, shared with the JSON body and request logs.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Auth(e) => e.code(),
            ServerError::Tunnel(TunnelError::StartFailed(_)) => "tunnel_start_failed",
            ServerError::Tunnel(TunnelError::StopFailed(_)) => "tunnel_stop_failed",
            ServerError::Tunnel(TunnelError::Spawn { .. }) => "tunnel_spawn_failed",
            ServerError::TunnelDisabled => "tunnel_disabled",
            ServerError::Internal(_) => "internal_error",
        }
    }
}

/// Response extension naming the failure behind an error response.
///
/// Read by the request logging middleware; never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub &'static str);

/// Error body for authorization routes.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// Error body for tunnel routes.
#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub success: bool,
    pub message: String,
}

impl FailureResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

fn auth_status(e: &OAuthError) -> StatusCode {
    match e {
        OAuthError::CorrelationMismatch
        | OAuthError::NoPendingAuthorization
        | OAuthError::AuthorizationExpired
        | OAuthError::ProviderExchange(_) => StatusCode::BAD_REQUEST,
        OAuthError::Token(_) => StatusCode::UNAUTHORIZED,
        OAuthError::UserInfo(_) => StatusCode::BAD_GATEWAY,
        OAuthError::RedirectUriUnavailable(_) | OAuthError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let code = self.code();

        let mut response = match self {
            ServerError::Tunnel(ref e) => {
                if e.is_non_fatal() {
                    tracing::warn!(error = %message, "Tunnel error");
                } else {
                    tracing::error!(error = %message, "Tunnel error");
                }
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(FailureResponse::new(message)),
                )
                    .into_response()
            }
            ServerError::TunnelDisabled => {
                (StatusCode::BAD_REQUEST, Json(FailureResponse::new(message))).into_response()
            }
            ServerError::Auth(ref e) => {
                let status = auth_status(e);
                if status.is_server_error() {
                    tracing::error!(status = %status, code = e.code(), error = %message, "Server error");
                } else {
                    tracing::warn!(status = %status, code = e.code(), error = %message, "Client error");
                }
                let body = ErrorResponse {
                    error: code.to_string(),
                    message,
                };
                (status, Json(body)).into_response()
            }
            ServerError::Internal(_) => {
                tracing::error!(error = %message, "Server error");
                let body = ErrorResponse {
                    error: code.to_string(),
                    message,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        };

        response.extensions_mut().insert(ErrorCode(code));
        response
    }
}

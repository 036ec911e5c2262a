//! Error types for the authorization flow and session tokens.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Errors raised while driving the authorization flow.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The callback's state does not match the pending attempt.
    #[error("Authorization state does not match the pending request")]
    CorrelationMismatch,

    /// No authorization attempt is waiting for a callback.
    #[error("No authorization is pending")]
    NoPendingAuthorization,

    /// The pending attempt is too old to complete.
    #[error("Authorization attempt expired, start again")]
    AuthorizationExpired,

    /// The provider refused the code, denied access or could not be reached.
    #[error("Provider exchange failed: {0}")]
    ProviderExchange(String),

    /// No callback address can be produced (tunnel not active).
    #[error("Redirect URI unavailable: {0}")]
    RedirectUriUnavailable(String),

    /// Fetching the user profile failed.
    #[error("User info request failed: {0}")]
    UserInfo(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Session token error.
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl OAuthError {
    /// Stable machine-readable code for JSON responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CorrelationMismatch => "correlation_mismatch",
            Self::NoPendingAuthorization => "no_pending_authorization",
            Self::AuthorizationExpired => "authorization_expired",
            Self::ProviderExchange(_) => "provider_exchange_error",
            Self::RedirectUriUnavailable(_) => "redirect_uri_unavailable",
            Self::UserInfo(_) => "user_info_error",
            Self::Config(_) => "config_error",
            Self::Token(e) => e.reason(),
        }
    }
}

/// Errors raised when verifying a session token.
///
/// A tampered payload and a token signed with another secret both surface as
/// [`TokenError::BadSignature`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Session token is malformed")]
    MalformedToken,

    #[error("Session token signature is invalid")]
    BadSignature,

    #[error("Session token has expired")]
    Expired,

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

impl TokenError {
    /// Reason string reported to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::InvalidKey(_) => "invalid_key",
        }
    }
}

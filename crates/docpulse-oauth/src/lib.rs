//! Delegated authorization and session credentials.
//!
//! # Components
//!
//! - [`provider`] - document platform client: authorization URL, code exchange, user info
//! - [`redirect`] - callback address resolution (static or tunnel-provided)
//! - [`coordinator`] - the redirect / callback protocol with single-use correlation values
//! - [`session`] - signed, expiring session tokens wrapping the upstream access token

pub mod coordinator;
pub mod error;
pub mod provider;
pub mod redirect;
pub mod session;

pub use coordinator::{
    AuthorizationCoordinator, AuthorizationPhase, AuthorizationRedirect, StateSource,
    generate_state,
};
pub use error::{OAuthError, Result, TokenError};
pub use provider::{
    AuthorizationProvider, FeishuProvider, ProviderConfig, ProviderToken, SharedProvider,
};
pub use redirect::RedirectUriResolver;
pub use session::{
    Clock, ManualClock, SESSION_TTL_SECS, SessionCredential, SessionIssuer, SessionKey,
    SharedClock, SystemClock, UpstreamCredential, VerifiedSession, generate_secret,
};

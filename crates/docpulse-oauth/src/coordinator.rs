//! Authorization flow driver.
//!
//! Holds at most one pending attempt. The pending marker is taken out under the lock
//! before its correlation value is compared, so a value is consumed exactly once and two
//! racing callbacks can never both reach the provider.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::error::{OAuthError, Result};
use crate::provider::SharedProvider;
use crate::redirect::RedirectUriResolver;
use crate::session::{SessionCredential, SessionIssuer, UpstreamCredential};

/// Pending attempts older than this cannot be completed.
const PENDING_TTL_SECS: i64 = 10 * 60;

/// Phase of the most recent authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationPhase {
    Idle,
    PendingCallback,
    Completed,
    Denied,
    Expired,
}

/// Where to send the browser to start authorizing.
#[derive(Debug, Clone)]
pub struct AuthorizationRedirect {
    pub url: String,
    pub state: String,
    pub redirect_uri: String,
}

struct PendingAuthorization {
    state: String,
    redirect_uri: String,
    created_at: DateTime<Utc>,
}

struct AuthorizationState {
    pending: Option<PendingAuthorization>,
    phase: AuthorizationPhase,
}

/// Generates correlation values.
pub type StateSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Generate a random correlation value.
pub fn generate_state() -> String {
    let mut state_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut state_bytes);
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Drives redirect-to-provider and code exchange.
pub struct AuthorizationCoordinator {
    provider: SharedProvider,
    resolver: RedirectUriResolver,
    issuer: Arc<SessionIssuer>,
    state: Mutex<AuthorizationState>,
    state_source: StateSource,
    pending_ttl: TimeDelta,
}

impl AuthorizationCoordinator {
    pub fn new(
        provider: SharedProvider,
        resolver: RedirectUriResolver,
        issuer: Arc<SessionIssuer>,
    ) -> Self {
        Self {
            provider,
            resolver,
            issuer,
            state: Mutex::new(AuthorizationState {
                pending: None,
                phase: AuthorizationPhase::Idle,
            }),
            state_source: Arc::new(generate_state),
            pending_ttl: TimeDelta::seconds(PENDING_TTL_SECS),
        }
    }

    /// Replace the correlation value generator.
    pub fn with_state_source(mut self, source: StateSource) -> Self {
        self.state_source = source;
        self
    }

    /// Set how long a pending attempt stays completable.
    pub fn with_pending_ttl(mut self, ttl: TimeDelta) -> Self {
        self.pending_ttl = ttl;
        self
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    pub fn resolver(&self) -> &RedirectUriResolver {
        &self.resolver
    }

    pub fn issuer(&self) -> &Arc<SessionIssuer> {
        &self.issuer
    }

    pub fn phase(&self) -> AuthorizationPhase {
        self.state.lock().phase
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Start an attempt, replacing any attempt still waiting for its callback.
    pub fn begin_authorization(&self) -> Result<AuthorizationRedirect> {
        let redirect_uri = self.resolver.resolve()?;
        let state = (self.state_source)();
        let url = self.provider.authorization_url(&redirect_uri, &state);

        {
            let mut guard = self.state.lock();
            if guard.pending.is_some() {
                tracing::debug!("Replacing pending authorization attempt");
            }
            guard.pending = Some(PendingAuthorization {
                state: state.clone(),
                redirect_uri: redirect_uri.clone(),
                created_at: self.issuer.now(),
            });
            guard.phase = AuthorizationPhase::PendingCallback;
        }

        tracing::info!(redirect_uri = %redirect_uri, "Authorization started");
        Ok(AuthorizationRedirect {
            url,
            state,
            redirect_uri,
        })
    }

    /// Finish an attempt with the code and state the provider returned.
    pub async fn complete_authorization(
        &self,
        code: &str,
        returned_state: &str,
    ) -> Result<SessionCredential> {
        let pending = self.consume(returned_state)?;

        if code.is_empty() {
            self.settle(AuthorizationPhase::Denied);
            return Err(OAuthError::ProviderExchange(
                "callback carried no authorization code".to_string(),
            ));
        }

        // Exchange with the address the attempt began with, even if the tunnel moved since.
        let token = match self
            .provider
            .exchange_code(code, &pending.redirect_uri)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                self.settle(AuthorizationPhase::Denied);
                tracing::warn!(error = %e, "Authorization code exchange failed");
                return Err(match e {
                    OAuthError::ProviderExchange(_) => e,
                    other => OAuthError::ProviderExchange(other.to_string()),
                });
            }
        };

        let upstream = UpstreamCredential {
            access_token: token.access_token,
            obtained_at: self.issuer.now().timestamp(),
            provider_expiry_hint: token.expires_in,
        };
        let credential = self.issuer.issue(&upstream);
        self.settle(AuthorizationPhase::Completed);

        tracing::info!(expires_at = %credential.expires_at, "Authorization completed");
        Ok(credential)
    }

    /// Record a provider-side refusal (`error` query parameter on the callback).
    pub fn deny(&self, returned_state: &str, error: &str) -> OAuthError {
        if let Err(e) = self.consume(returned_state) {
            return e;
        }
        self.settle(AuthorizationPhase::Denied);
        tracing::info!(error, "Authorization denied by provider");
        OAuthError::ProviderExchange(format!("authorization denied: {}", error))
    }

    /// Take the pending attempt if `returned_state` matches it. The marker is cleared in
    /// every case.
    fn consume(&self, returned_state: &str) -> Result<PendingAuthorization> {
        let mut guard = self.state.lock();
        let Some(pending) = guard.pending.take() else {
            return Err(OAuthError::NoPendingAuthorization);
        };

        let matches: bool = pending
            .state
            .as_bytes()
            .ct_eq(returned_state.as_bytes())
            .into();
        if !matches {
            guard.phase = AuthorizationPhase::Idle;
            tracing::warn!("Authorization callback state mismatch");
            return Err(OAuthError::CorrelationMismatch);
        }

        if self.issuer.now() - pending.created_at > self.pending_ttl {
            guard.phase = AuthorizationPhase::Expired;
            return Err(OAuthError::AuthorizationExpired);
        }

        Ok(pending)
    }

    /// Record the outcome unless a newer attempt has begun meanwhile.
    fn settle(&self, phase: AuthorizationPhase) {
        let mut guard = self.state.lock();
        if guard.pending.is_none() {
            guard.phase = phase;
        }
    }
}

impl std::fmt::Debug for AuthorizationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCoordinator")
            .field("provider", &self.provider)
            .field("resolver", &self.resolver)
            .field("phase", &self.phase())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

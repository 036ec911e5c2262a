//! Signed, expiring session credentials.
//!
//! A session token is `base64url(claims_json) "." base64url(hmac_sha256(secret, first_segment))`.
//! The claims carry the upstream access token, so the token is the entire session: nothing
//! is stored server-side and nothing can be revoked before expiry.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Deserialize;
use sha2::Sha256;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of every session credential, in seconds.
pub const SESSION_TTL_SECS: i64 = 30 * 60;

const ISSUER: &str = "docpulse";

/// Length of generated signing secrets, in bytes.
const SECRET_BYTES: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Access credential obtained from the provider's code exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamCredential {
    pub access_token: String,
    /// Unix timestamp (seconds) of the exchange.
    pub obtained_at: i64,
    /// Provider-reported lifetime of the access token, in seconds.
    pub provider_expiry_hint: Option<u64>,
}

impl std::fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamCredential")
            .field("access_token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("provider_expiry_hint", &self.provider_expiry_hint)
            .finish()
    }
}

/// A freshly issued session token.
#[derive(Clone)]
pub struct SessionCredential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionCredential {
    /// Seconds until expiry, measured from `now`. Never negative.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of verifying a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSession {
    pub upstream: UpstreamCredential,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerifiedSession {
    /// Seconds until expiry, measured from `now`. Never negative.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[derive(Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
    tok: String,
    obt: i64,
    #[serde(default)]
    hint: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Signing key
// ─────────────────────────────────────────────────────────────────────────────

/// Generate a random signing secret, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Process-wide HMAC key. Held in memory only.
#[derive(Clone)]
pub struct SessionKey {
    mac: HmacSha256,
}

impl SessionKey {
    /// Key from random bytes, for deployments without a configured secret.
    pub fn generate() -> Result<Self, TokenError> {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self::from_bytes(&bytes)
    }

    /// Key from raw secret bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        if bytes.is_empty() {
            return Err(TokenError::InvalidKey("signing secret is empty".to_string()));
        }
        HmacSha256::new_from_slice(bytes)
            .map(|mac| Self { mac })
            .map_err(|e| TokenError::InvalidKey(e.to_string()))
    }

    /// Key from a configured secret string.
    pub fn from_secret(secret: &str) -> Result<Self, TokenError> {
        Self::from_bytes(secret.as_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuer / verifier
// ─────────────────────────────────────────────────────────────────────────────

/// Issues and verifies session tokens.
#[derive(Debug, Clone)]
pub struct SessionIssuer {
    key: SessionKey,
    clock: SharedClock,
}

impl SessionIssuer {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Wrap `upstream` into a token valid for exactly [`SESSION_TTL_SECS`].
    pub fn issue(&self, upstream: &UpstreamCredential) -> SessionCredential {
        let now = self.clock.now();
        let iat = now.timestamp();
        let exp = iat + SESSION_TTL_SECS;

        let mut claims = serde_json::json!({
            "iss": ISSUER,
            "iat": iat,
            "exp": exp,
            "tok": upstream.access_token,
            "obt": upstream.obtained_at,
        });
        if let Some(hint) = upstream.provider_expiry_hint {
            claims["hint"] = hint.into();
        }

        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let mut mac = self.key.mac();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        let issued_at = DateTime::from_timestamp(iat, 0).unwrap_or(now);
        SessionCredential {
            token: format!("{payload}.{signature}"),
            issued_at,
            expires_at: issued_at + TimeDelta::seconds(SESSION_TTL_SECS),
        }
    }

    /// Verify `token` and return the wrapped upstream credential.
    pub fn verify(&self, token: &str) -> Result<UpstreamCredential, TokenError> {
        Ok(self.verify_session(token)?.upstream)
    }

    /// Verify `token` and return the full session details.
    pub fn verify_session(&self, token: &str) -> Result<VerifiedSession, TokenError> {
        let (payload, signature) = token
            .trim()
            .split_once('.')
            .ok_or(TokenError::MalformedToken)?;
        if payload.is_empty() || signature.is_empty() || signature.contains('.') {
            return Err(TokenError::MalformedToken);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::MalformedToken)?;
        let mut mac = self.key.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::MalformedToken)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::MalformedToken)?;
        if claims.iss != ISSUER {
            return Err(TokenError::MalformedToken);
        }

        if self.clock.now().timestamp() > claims.exp {
            return Err(TokenError::Expired);
        }

        let issued_at =
            DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::MalformedToken)?;
        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::MalformedToken)?;

        Ok(VerifiedSession {
            upstream: UpstreamCredential {
                access_token: claims.tok,
                obtained_at: claims.obt,
                provider_expiry_hint: claims.hint,
            },
            issued_at,
            expires_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (SessionIssuer, Arc<ManualClock>) {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let issuer = SessionIssuer::new(SessionKey::from_secret(&"k".repeat(32)).unwrap())
            .with_clock(clock.clone());
        (issuer, clock)
    }

    fn upstream() -> UpstreamCredential {
        UpstreamCredential {
            access_token: "u-abc123".to_string(),
            obtained_at: 1_700_000_000,
            provider_expiry_hint: Some(7200),
        }
    }

    #[test]
    fn test_issue_sets_fixed_ttl() {
        let (issuer, _clock) = fixture();
        let credential = issuer.issue(&upstream());
        assert_eq!(
            (credential.expires_at - credential.issued_at).num_seconds(),
            SESSION_TTL_SECS
        );
        assert_eq!(credential.issued_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_verify_returns_upstream_until_expiry() {
        let (issuer, clock) = fixture();
        let credential = issuer.issue(&upstream());

        assert_eq!(issuer.verify(&credential.token).unwrap(), upstream());

        clock.advance(TimeDelta::seconds(SESSION_TTL_SECS - 1));
        assert_eq!(issuer.verify(&credential.token).unwrap(), upstream());

        // Exactly at expires_at the token is still valid; one second later it is not.
        clock.advance(TimeDelta::seconds(1));
        assert!(issuer.verify(&credential.token).is_ok());
        clock.advance(TimeDelta::seconds(1));
        assert_eq!(
            issuer.verify(&credential.token).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn test_expired_after_31_minutes() {
        let (issuer, clock) = fixture();
        let credential = issuer.issue(&upstream());
        clock.advance(TimeDelta::minutes(31));
        assert_eq!(
            issuer.verify(&credential.token).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn test_flipped_payload_byte_is_bad_signature() {
        let (issuer, _clock) = fixture();
        let credential = issuer.issue(&upstream());
        let dot = credential.token.find('.').unwrap();

        for index in [0, dot / 2, dot - 1] {
            let mut bytes = credential.token.clone().into_bytes();
            bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert_eq!(
                issuer.verify(&tampered).unwrap_err(),
                TokenError::BadSignature,
                "index {index}"
            );
        }
    }

    #[test]
    fn test_other_secret_is_bad_signature() {
        let (issuer, _clock) = fixture();
        let credential = issuer.issue(&upstream());
        let other = SessionIssuer::new(SessionKey::generate().unwrap());
        assert_eq!(
            other.verify(&credential.token).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let (issuer, _clock) = fixture();
        for token in ["", "no-dot", ".sig", "payload.", "a.b.c", "payload.!!!"] {
            assert_eq!(
                issuer.verify(token).unwrap_err(),
                TokenError::MalformedToken,
                "token {token:?}"
            );
        }
    }

    #[test]
    fn test_validly_signed_garbage_is_malformed() {
        let (issuer, _clock) = fixture();
        let payload = URL_SAFE_NO_PAD.encode(b"{\"not\":\"claims\"}");
        let mut mac = issuer.key.mac();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        assert_eq!(
            issuer.verify(&format!("{payload}.{signature}")).unwrap_err(),
            TokenError::MalformedToken
        );
    }

    #[test]
    fn test_missing_hint_round_trips() {
        let (issuer, _clock) = fixture();
        let upstream = UpstreamCredential {
            provider_expiry_hint: None,
            ..upstream()
        };
        let credential = issuer.issue(&upstream);
        assert_eq!(issuer.verify(&credential.token).unwrap(), upstream);
    }

    #[test]
    fn test_debug_redacts() {
        let (issuer, _clock) = fixture();
        let credential = issuer.issue(&upstream());
        assert!(!format!("{:?}", credential).contains(&credential.token));
        assert!(!format!("{:?}", upstream()).contains("u-abc123"));
        assert!(!format!("{:?}", issuer).contains("kkkk"));
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), SECRET_BYTES * 2);
        assert_ne!(a, b);
        assert!(SessionKey::from_secret(&a).is_ok());
        assert!(SessionKey::from_secret("").is_err());
    }
}

//! Configuration types.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1"
//! port = 5001
//!
//! [provider]
//! app_id = "cli_xxx"
//! redirect_uri = "https://stats.example.com/auth/callback"   # omit for tunnel mode
//!
//! [session]
//! post_auth_redirect = "/"
//!
//! [tunnel]
//! enabled = true
//! backend = "ngrok"
//! ```

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Minimum length of a configured signing secret, in bytes.
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Path the provider redirects back to after the user grants access.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5001;

/// Default bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1";

// ─────────────────────────────────────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocpulseConfig {
    /// HTTP listener settings.
    pub server: ServerSection,
    /// Document platform (authorization provider) settings.
    pub provider: ProviderSection,
    /// Session credential settings.
    pub session: SessionSection,
    /// Secure tunnel settings.
    pub tunnel: TunnelSection,
}

impl DocpulseConfig {
    /// Create an empty config with defaults everywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Decide where the provider should send the user back to.
    ///
    /// A configured static redirect URI always wins (production mode). Otherwise the
    /// tunnel supplies the address when enabled; failing both, the local listener address
    /// is used.
    pub fn redirect_setting(&self) -> RedirectSetting {
        if let Some(uri) = self.provider.redirect_uri.as_deref()
            && !uri.is_empty()
        {
            return RedirectSetting::Static(uri.to_string());
        }
        if self.tunnel.enabled {
            return RedirectSetting::Tunnel;
        }
        RedirectSetting::Static(format!(
            "http://{}:{}{}",
            self.server.bind, self.server.port, CALLBACK_PATH
        ))
    }

    /// Validate values that would make startup unsafe.
    ///
    /// Returns human-readable warnings for settings that degrade functionality
    /// without preventing the server from running.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if let Some(secret) = self.session.signing_secret.as_deref()
            && secret.len() < MIN_SIGNING_SECRET_LEN
        {
            return Err(ConfigError::WeakSigningSecret {
                len: secret.len(),
                min: MIN_SIGNING_SECRET_LEN,
            });
        }

        if self.provider.app_id.is_empty() {
            warnings.push(
                "provider.app_id is not set (FEISHU_APP_ID); authorization will fail".to_string(),
            );
        }
        if self.provider.app_secret.as_deref().is_none_or(str::is_empty) {
            warnings.push(
                "provider.app_secret is not set (FEISHU_APP_SECRET); code exchange will fail"
                    .to_string(),
            );
        }
        if self.tunnel.backend == TunnelBackendKind::Custom && self.tunnel.command.is_none() {
            warnings.push("tunnel.backend = \"custom\" requires tunnel.command".to_string());
        }

        Ok(warnings)
    }
}

/// Where the authorization callback address comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectSetting {
    /// Fixed address; tunnel state is irrelevant.
    Static(String),
    /// Address derived from the active tunnel's public endpoint.
    Tunnel,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on. The tunnel exposes this port by default.
    pub port: u16,
    /// Enable request logging.
    pub request_logging: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            request_logging: true,
        }
    }
}

/// `[provider]` section.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Application id registered with the document platform.
    pub app_id: String,
    /// Application secret. Prefer `FEISHU_APP_SECRET` over the config file.
    pub app_secret: Option<String>,
    /// Static redirect URI (production mode).
    pub redirect_uri: Option<String>,
    /// Browser-facing authorization endpoint.
    pub authorize_url: Option<String>,
    /// Base URL of the platform's open API.
    pub api_base: Option<String>,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Timeout for provider HTTP calls, in seconds.
    pub timeout_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: None,
            redirect_uri: None,
            authorize_url: None,
            api_base: None,
            scopes: vec![
                "drive:drive.metadata:readonly".to_string(),
                "wiki:wiki:readonly".to_string(),
                "wiki:node:retrieve".to_string(),
            ],
            timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for ProviderSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSection")
            .field("app_id", &self.app_id)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("authorize_url", &self.authorize_url)
            .field("api_base", &self.api_base)
            .field("scopes", &self.scopes)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// `[session]` section.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Secret for signing session credentials. Generated at startup when absent.
    pub signing_secret: Option<String>,
    /// Where to send the browser after a successful callback (`?token=` is appended).
    /// When unset the callback answers with JSON instead.
    pub post_auth_redirect: Option<String>,
}

impl std::fmt::Debug for SessionSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSection")
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("post_auth_redirect", &self.post_auth_redirect)
            .finish()
    }
}

/// Which tunnel program to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelBackendKind {
    #[default]
    Ngrok,
    Cloudflared,
    Custom,
}

impl std::str::FromStr for TunnelBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ngrok" => Ok(Self::Ngrok),
            "cloudflared" => Ok(Self::Cloudflared),
            "custom" => Ok(Self::Custom),
            _ => Err(ConfigError::InvalidValue {
                key: "tunnel.backend".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// `[tunnel]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSection {
    /// Derive the redirect URI from a tunnel (development mode).
    pub enabled: bool,
    /// Start the tunnel while the server boots.
    pub auto_start: bool,
    /// Tunnel program family.
    pub backend: TunnelBackendKind,
    /// Program path. Defaults to the backend's binary name; required for `custom`.
    pub command: Option<String>,
    /// Arguments for `custom` backends. `{port}` is replaced with the local port.
    pub args: Vec<String>,
    /// How long to wait for the public endpoint, in seconds.
    pub start_timeout_secs: u64,
    /// Grace period between the terminate signal and a forced kill, in seconds.
    pub stop_grace_secs: u64,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_start: true,
            backend: TunnelBackendKind::default(),
            command: None,
            args: Vec::new(),
            start_timeout_secs: 15,
            stop_grace_secs: 5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DocpulseConfig::new();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert!(!config.tunnel.enabled);
        assert_eq!(config.tunnel.start_timeout_secs, 15);
        assert_eq!(config.provider.scopes.len(), 3);
    }

    #[test]
    fn test_parse_full() {
        let config = DocpulseConfig::from_toml(
            r#"
[server]
port = 8000

[provider]
app_id = "cli_test"
redirect_uri = "https://stats.example.com/auth/callback"

[tunnel]
enabled = true
backend = "cloudflared"
start_timeout_secs = 30
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.provider.app_id, "cli_test");
        assert_eq!(config.tunnel.backend, TunnelBackendKind::Cloudflared);
        assert_eq!(config.tunnel.start_timeout_secs, 30);
        assert_eq!(config.tunnel.stop_grace_secs, 5);
    }

    #[test]
    fn test_static_redirect_wins_over_tunnel() {
        let mut config = DocpulseConfig::new();
        config.tunnel.enabled = true;
        config.provider.redirect_uri = Some("https://prod.example.com/auth/callback".to_string());

        assert_eq!(
            config.redirect_setting(),
            RedirectSetting::Static("https://prod.example.com/auth/callback".to_string())
        );
    }

    #[test]
    fn test_tunnel_redirect_setting() {
        let mut config = DocpulseConfig::new();
        config.tunnel.enabled = true;
        assert_eq!(config.redirect_setting(), RedirectSetting::Tunnel);
    }

    #[test]
    fn test_local_redirect_fallback() {
        let config = DocpulseConfig::new();
        assert_eq!(
            config.redirect_setting(),
            RedirectSetting::Static("http://127.0.0.1:5001/auth/callback".to_string())
        );
    }

    #[test]
    fn test_weak_secret_rejected() {
        let mut config = DocpulseConfig::new();
        config.session.signing_secret = Some("short".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::WeakSigningSecret { len: 5, min: 32 }
        ));
    }

    #[test]
    fn test_missing_credentials_warn() {
        let config = DocpulseConfig::new();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("FEISHU_APP_ID"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = DocpulseConfig::new();
        config.provider.app_secret = Some("app-secret-value".to_string());
        config.session.signing_secret = Some("x".repeat(40));

        let debug = format!("{:?}", config);
        assert!(!debug.contains("app-secret-value"));
        assert!(!debug.contains(&"x".repeat(40)));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(
            "NGROK".parse::<TunnelBackendKind>().unwrap(),
            TunnelBackendKind::Ngrok
        );
        assert!("frp".parse::<TunnelBackendKind>().is_err());
    }
}

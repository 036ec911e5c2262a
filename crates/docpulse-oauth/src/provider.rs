//! Document platform (Feishu / Lark) authorization client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{OAuthError, Result};

/// Browser-facing authorization endpoint.
pub const FEISHU_AUTHORIZE_URL: &str = "https://accounts.feishu.cn/open-apis/authen/v1/authorize";

/// Base URL of the open API.
pub const FEISHU_API_BASE: &str = "https://open.feishu.cn";

const TOKEN_PATH: &str = "/open-apis/authen/v2/oauth/token";
const USER_INFO_PATH: &str = "/open-apis/authen/v1/user_info";

/// Scopes needed to read document metadata and wiki nodes.
pub const DEFAULT_SCOPES: &[&str] = &[
    "drive:drive.metadata:readonly",
    "wiki:wiki:readonly",
    "wiki:node:retrieve",
];

/// Provider endpoints and application credentials.
#[derive(Clone)]
pub struct ProviderConfig {
    pub app_id: String,
    pub app_secret: String,
    pub authorize_url: String,
    pub api_base: String,
    pub scopes: Vec<String>,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Config for the public Feishu endpoints.
    pub fn feishu(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            authorize_url: FEISHU_AUTHORIZE_URL.to_string(),
            api_base: FEISHU_API_BASE.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .field("authorize_url", &self.authorize_url)
            .field("api_base", &self.api_base)
            .field("scopes", &self.scopes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Build the URL the browser is redirected to.
pub fn build_authorization_url(config: &ProviderConfig, redirect_uri: &str, state: &str) -> String {
    let scope = config.scopes.join(" ");
    let params = [
        ("app_id", config.app_id.as_str()),
        ("redirect_uri", redirect_uri),
        ("state", state),
        ("response_type", "code"),
        ("scope", scope.as_str()),
    ];

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", config.authorize_url, query)
}

/// Access token returned by a successful code exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderToken {
    pub access_token: String,
    /// Lifetime reported by the provider, in seconds.
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// ============================================================================
// Provider trait
// ============================================================================

/// The identity/resource provider side of the delegated authorization flow.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync + std::fmt::Debug {
    /// URL that asks the user to grant access and return to `redirect_uri`.
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String;

    /// Exchange an authorization code. `redirect_uri` must equal the one used to begin.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<ProviderToken>;

    /// Fetch the profile of the user owning `access_token`.
    async fn user_info(&self, access_token: &str) -> Result<serde_json::Value>;
}

pub type SharedProvider = Arc<dyn AuthorizationProvider>;

// ============================================================================
// Feishu
// ============================================================================

#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct TokenExchangeResponse {
    #[serde(default)]
    code: i64,
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
}

impl TokenExchangeResponse {
    fn describe(&self) -> String {
        self.error_description
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| format!("provider returned code {}", self.code))
    }
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<serde_json::Value>,
}

/// Feishu / Lark open platform client.
#[derive(Debug, Clone)]
pub struct FeishuProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl FeishuProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OAuthError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[async_trait]
impl AuthorizationProvider for FeishuProvider {
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        build_authorization_url(&self.config, redirect_uri, state)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<ProviderToken> {
        let body = TokenExchangeRequest {
            grant_type: "authorization_code",
            client_id: &self.config.app_id,
            client_secret: &self.config.app_secret,
            code,
            redirect_uri,
        };

        let response = self
            .client
            .post(format!("{}{}", self.config.api_base, TOKEN_PATH))
            .json(&body)
            .send()
            .await
            .map_err(|e| OAuthError::ProviderExchange(format!("token request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            OAuthError::ProviderExchange(format!("failed to read token response: {}", e))
        })?;
        let parsed: TokenExchangeResponse = serde_json::from_str(&text).unwrap_or_default();

        if !status.is_success() || parsed.code != 0 {
            tracing::warn!(
                status = status.as_u16(),
                code = parsed.code,
                "Provider rejected authorization code"
            );
            return Err(OAuthError::ProviderExchange(format!(
                "HTTP {}: {}",
                status.as_u16(),
                parsed.describe()
            )));
        }

        match parsed.access_token {
            Some(access_token) if !access_token.is_empty() => Ok(ProviderToken {
                access_token,
                expires_in: parsed.expires_in,
            }),
            _ => Err(OAuthError::ProviderExchange(
                "token response missing access_token".to_string(),
            )),
        }
    }

    async fn user_info(&self, access_token: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}{}", self.config.api_base, USER_INFO_PATH))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OAuthError::UserInfo(format!("request failed: {}", e)))?;

        let status = response.status();
        let parsed: UserInfoResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::UserInfo(format!("HTTP {}: {}", status.as_u16(), e)))?;

        if !status.is_success() || parsed.code != 0 {
            return Err(OAuthError::UserInfo(format!(
                "HTTP {}: code {} {}",
                status.as_u16(),
                parsed.code,
                parsed.msg
            )));
        }

        parsed
            .data
            .ok_or_else(|| OAuthError::UserInfo("response missing data".to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Tunnel backend and manager configuration.

use std::time::Duration;

use url::Url;

use crate::detect::EndpointDetector;

/// Callback path appended to the public URL when no other path is configured.
pub const DEFAULT_CALLBACK_PATH: &str = "/auth/callback";

const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// The external program that provides the public endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelBackend {
    /// `ngrok http {port}` with JSON logs on stdout.
    Ngrok,
    /// `cloudflared tunnel --url http://localhost:{port}` (quick tunnel).
    Cloudflared,
    /// Arbitrary command; the first URL it prints is taken as the endpoint.
    /// `{port}` in arguments is replaced with the local port.
    Custom { program: String, args: Vec<String> },
}

impl TunnelBackend {
    /// Program name and arguments used to expose `port`.
    pub fn command_line(&self, port: u16) -> (String, Vec<String>) {
        match self {
            Self::Ngrok => (
                "ngrok".to_string(),
                vec![
                    "http".to_string(),
                    port.to_string(),
                    "--log".to_string(),
                    "stdout".to_string(),
                    "--log-format".to_string(),
                    "json".to_string(),
                ],
            ),
            Self::Cloudflared => (
                "cloudflared".to_string(),
                vec![
                    "tunnel".to_string(),
                    "--url".to_string(),
                    format!("http://localhost:{port}"),
                ],
            ),
            Self::Custom { program, args } => (
                program.clone(),
                args.iter()
                    .map(|a| a.replace("{port}", &port.to_string()))
                    .collect(),
            ),
        }
    }

    /// How the public endpoint is recognised in this backend's output.
    pub fn detector(&self) -> EndpointDetector {
        match self {
            Self::Ngrok => EndpointDetector::NgrokJson,
            Self::Cloudflared => EndpointDetector::HostSuffix(".trycloudflare.com"),
            Self::Custom { .. } => EndpointDetector::FirstUrl,
        }
    }

    /// Short name for logs and status output.
    pub fn name(&self) -> &str {
        match self {
            Self::Ngrok => "ngrok",
            Self::Cloudflared => "cloudflared",
            Self::Custom { .. } => "custom",
        }
    }
}

/// Configuration for a [`TunnelManager`](crate::TunnelManager).
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Backend to run.
    pub backend: TunnelBackend,
    /// Replaces the backend's default program name (e.g. an absolute ngrok path).
    pub program: Option<String>,
    /// Local port exposed when `start` is called without an explicit port.
    pub local_port: u16,
    /// Path appended to the public URL to form the redirect URI.
    pub callback_path: String,
    /// Upper bound on waiting for the public endpoint.
    pub start_timeout: Duration,
    /// Time between the terminate signal and a forced kill.
    pub stop_grace: Duration,
}

impl TunnelConfig {
    /// Create a config for `backend` exposing `local_port`.
    pub fn new(backend: TunnelBackend, local_port: u16) -> Self {
        Self {
            backend,
            program: None,
            local_port,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Override the program path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Set the callback path.
    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = path.into();
        self
    }

    /// Set the start timeout.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Set the stop grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Program and arguments for exposing `port`.
    pub(crate) fn command_line(&self, port: u16) -> (String, Vec<String>) {
        let (program, args) = self.backend.command_line(port);
        (self.program.clone().unwrap_or(program), args)
    }

    /// Redirect URI for a given public URL: its origin plus the callback path.
    pub fn redirect_uri_for(&self, public_url: &Url) -> String {
        let mut uri = public_url.clone();
        uri.set_path(&self.callback_path);
        uri.set_query(None);
        uri.set_fragment(None);
        uri.into()
    }
}

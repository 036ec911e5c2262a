//! Application state shared across handlers.

use std::sync::Arc;

use docpulse_oauth::{AuthorizationCoordinator, RedirectUriResolver, SessionIssuer};
use docpulse_tunnel::TunnelManager;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Authorization flow driver.
    pub coordinator: Arc<AuthorizationCoordinator>,

    /// Session token issuer/verifier (shared with the coordinator).
    pub issuer: Arc<SessionIssuer>,

    /// Tunnel manager (None unless running in tunnel mode).
    pub tunnel: Option<Arc<TunnelManager>>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The tunnel manager is taken from the coordinator's redirect resolver when it
    /// runs in tunnel mode.
    pub fn new(config: ServerConfig, coordinator: AuthorizationCoordinator) -> Self {
        let issuer = coordinator.issuer().clone();
        let tunnel = coordinator.resolver().tunnel().cloned();
        Self {
            config: Arc::new(config),
            coordinator: Arc::new(coordinator),
            issuer,
            tunnel,
        }
    }

    /// Attach a tunnel manager explicitly (e.g. to manage a tunnel while a static
    /// redirect address is configured).
    pub fn with_tunnel(mut self, manager: Arc<TunnelManager>) -> Self {
        self.tunnel = Some(manager);
        self
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// `static` or `tunnel`, depending on where callback addresses come from.
    pub fn redirect_mode(&self) -> &'static str {
        match self.coordinator.resolver() {
            RedirectUriResolver::Static(_) => "static",
            RedirectUriResolver::Tunnel(_) => "tunnel",
        }
    }
}

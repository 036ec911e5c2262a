//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5001;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Enable request logging.
    pub request_logging: bool,

    /// Where the browser goes after a successful callback. `?token=` is appended.
    /// `None` answers the callback with JSON.
    pub post_auth_redirect: Option<String>,

    /// Start the tunnel (if any) as soon as the listener is bound.
    pub auto_start_tunnel: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            request_logging: true,
            post_auth_redirect: None,
            auto_start_tunnel: false,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    /// Set the post-authorization redirect target.
    pub fn with_post_auth_redirect(mut self, url: impl Into<String>) -> Self {
        self.post_auth_redirect = Some(url.into());
        self
    }

    /// Enable or disable tunnel auto-start.
    pub fn with_auto_start_tunnel(mut self, enabled: bool) -> Self {
        self.auto_start_tunnel = enabled;
        self
    }
}

//! Secure tunnel lifecycle management.
//!
//! A [`TunnelManager`] owns at most one external tunnel process (ngrok, cloudflared or a
//! custom command) exposing the local listener on a temporary public endpoint. The
//! manager drives the `Stopped → Starting → Active` lifecycle, detects the public URL from
//! the process output, and supervises the child so that a crash moves the tunnel to
//! `Failed` and withdraws the advertised endpoint.
//!
//! ```rust,ignore
//! let manager = TunnelManager::new(TunnelConfig::new(TunnelBackend::Ngrok, 5001));
//! let endpoint = manager.start().await?;
//! println!("callback: {}", endpoint.redirect_uri);
//! manager.stop().await?;
//! ```

pub mod config;
pub mod detect;
pub mod error;
pub mod manager;

pub use config::{DEFAULT_CALLBACK_PATH, TunnelBackend, TunnelConfig};
pub use detect::{EndpointDetector, normalize_https, public_origin};
pub use error::{Result, TunnelError};
pub use manager::{TunnelEndpoint, TunnelManager, TunnelPhase, TunnelStatus};

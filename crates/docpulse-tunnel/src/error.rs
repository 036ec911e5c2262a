//! Error types for tunnel management.

use thiserror::Error;

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Errors raised by the tunnel manager.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The tunnel process did not report a public endpoint (timeout, crash, closed output).
    #[error("tunnel failed to start: {0}")]
    StartFailed(String),

    /// The tunnel process could not be terminated cleanly. The manager is `Stopped` anyway.
    #[error("tunnel did not stop cleanly: {0}")]
    StopFailed(String),

    /// The tunnel program could not be launched.
    #[error("failed to launch tunnel program '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

impl TunnelError {
    /// Whether the tunnel ended up in a usable state despite the error.
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, Self::StopFailed(_))
    }
}

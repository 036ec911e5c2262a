//! Callback address resolution.

use std::sync::Arc;

use docpulse_tunnel::TunnelManager;

use crate::error::{OAuthError, Result};

/// Source of the redirect URI sent to the provider.
///
/// Resolution reads the tunnel state on every call; nothing is cached here.
#[derive(Debug, Clone)]
pub enum RedirectUriResolver {
    /// Production mode: a fixed, publicly reachable callback address.
    Static(String),
    /// Development mode: the active tunnel's public URL plus the callback path.
    Tunnel(Arc<TunnelManager>),
}

impl RedirectUriResolver {
    /// Current callback address.
    ///
    /// In tunnel mode this fails with [`OAuthError::RedirectUriUnavailable`] unless the
    /// tunnel is active.
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Static(uri) => Ok(uri.clone()),
            Self::Tunnel(manager) => manager.redirect_uri().ok_or_else(|| {
                let status = manager.status();
                OAuthError::RedirectUriUnavailable(format!(
                    "tunnel is {}, start it first",
                    status.state
                ))
            }),
        }
    }

    /// The tunnel manager, when running in tunnel mode.
    pub fn tunnel(&self) -> Option<&Arc<TunnelManager>> {
        match self {
            Self::Static(_) => None,
            Self::Tunnel(manager) => Some(manager),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpulse_tunnel::{TunnelBackend, TunnelConfig};

    #[test]
    fn test_static_ignores_tunnel() {
        let resolver = RedirectUriResolver::Static("https://prod.example.test/auth/callback".into());
        assert_eq!(
            resolver.resolve().unwrap(),
            "https://prod.example.test/auth/callback"
        );
        assert!(resolver.tunnel().is_none());
    }

    #[test]
    fn test_stopped_tunnel_is_unavailable() {
        let manager = Arc::new(TunnelManager::new(TunnelConfig::new(TunnelBackend::Ngrok, 5001)));
        let resolver = RedirectUriResolver::Tunnel(manager);
        let err = resolver.resolve().unwrap_err();
        assert!(matches!(err, OAuthError::RedirectUriUnavailable(ref m) if m.contains("stopped")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tracks_tunnel_state() {
        let backend = TunnelBackend::Custom {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo https://live.example.test; exec sleep 30".to_string(),
            ],
        };
        let manager = Arc::new(TunnelManager::new(TunnelConfig::new(backend, 5001)));
        let resolver = RedirectUriResolver::Tunnel(manager.clone());

        manager.start().await.unwrap();
        let uri = resolver.resolve().unwrap();
        assert!(uri.contains("https://live.example.test"));
        assert!(uri.ends_with("/auth/callback"));

        manager.stop().await.unwrap();
        assert!(matches!(
            resolver.resolve(),
            Err(OAuthError::RedirectUriUnavailable(_))
        ));
    }
}

//! HTTP surface for docpulse.
//!
//! # Routes
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /auth` | begin authorization, 302 to the provider |
//! | `GET /auth/callback` | provider callback, issues the session token |
//! | `GET /auth/status` | report whether the bearer token is usable |
//! | `GET /auth/logout` | client-side discard instruction |
//! | `GET /auth/user-info` | provider profile (requires a session token) |
//! | `GET /tunnel/{start,stop,status,redirect-uri}` | tunnel management |
//! | `GET /health` | liveness |
//!
//! # Example
//!
//! ```ignore
//! use docpulse_server::{AppState, Server, ServerConfig};
//!
//! let state = AppState::new(ServerConfig::new(), coordinator);
//! Server::from_state(state).run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;

pub use auth::{Unauthorized, auth_middleware, authorize, bearer_token};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use logging::request_logging_middleware;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, middleware};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The docpulse HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        Router::new()
            .merge(routes::health_routes())
            .route("/auth", get(routes::begin))
            .route("/auth/callback", get(routes::callback))
            .route("/auth/status", get(routes::auth_status))
            .route("/auth/logout", get(routes::logout))
            .merge(self.protected_routes())
            .route("/tunnel/start", get(routes::tunnel_start))
            .route("/tunnel/stop", get(routes::tunnel_stop))
            .route("/tunnel/status", get(routes::tunnel_status))
            .route("/tunnel/redirect-uri", get(routes::tunnel_redirect_uri))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                logging::request_logging_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Routes that require a valid session token.
    fn protected_routes(&self) -> Router<AppState> {
        use axum::routing::get;

        Router::new()
            .route("/auth/user-info", get(routes::user_info))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ))
    }

    /// Run the server on the configured address until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_with_shutdown(addr, shutdown_signal()).await
    }

    /// Run the server on `addr` until `shutdown` resolves, then stop the tunnel.
    pub async fn run_with_shutdown<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(format!("Failed to read local address: {}", e)))?;
        info!("Starting server on {}", local);

        self.spawn_tunnel_autostart();

        let router = self.router();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)));

        if let Some(tunnel) = &self.state.tunnel
            && let Err(e) = tunnel.stop().await
        {
            tracing::warn!(error = %e, "Tunnel did not stop cleanly during shutdown");
        }
        info!("Server stopped");

        served
    }

    /// Start the tunnel in the background. Failure leaves the server running.
    fn spawn_tunnel_autostart(&self) {
        if !self.state.config.auto_start_tunnel {
            return;
        }
        let Some(tunnel) = self.state.tunnel.clone() else {
            return;
        };

        tokio::spawn(async move {
            match tunnel.start().await {
                Ok(endpoint) => {
                    info!(redirect_uri = %endpoint.redirect_uri, "Tunnel ready for authorization");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Tunnel auto-start failed; use /tunnel/start to retry");
                }
            }
        });
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use chrono::{TimeDelta, Utc};
    use docpulse_oauth::{
        AuthorizationCoordinator, FeishuProvider, ManualClock, ProviderConfig,
        RedirectUriResolver, SessionIssuer, SessionKey,
    };
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CALLBACK: &str = "http://localhost:5001/auth/callback";

    struct Harness {
        app: Router,
        clock: Arc<ManualClock>,
        _provider: MockServer,
    }

    async fn mock_provider() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open-apis/authen/v2/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "access_token": "tok1",
                "expires_in": 7200,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/open-apis/authen/v1/user_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "msg": "success",
                "data": { "name": "Ada" },
            })))
            .mount(&server)
            .await;
        server
    }

    async fn harness(config: ServerConfig) -> Harness {
        let provider_server = mock_provider().await;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let issuer =
            Arc::new(SessionIssuer::new(SessionKey::generate().unwrap()).with_clock(clock.clone()));
        let provider = FeishuProvider::new(
            ProviderConfig::feishu("cli_test", "secret").with_api_base(provider_server.uri()),
        )
        .unwrap();
        let coordinator = AuthorizationCoordinator::new(
            Arc::new(provider),
            RedirectUriResolver::Static(CALLBACK.to_string()),
            issuer,
        )
        .with_state_source(Arc::new(|| "abc123".to_string()));

        let server = Server::from_state(AppState::new(config, coordinator));
        Harness {
            app: server.router(),
            clock,
            _provider: provider_server,
        }
    }

    async fn get(app: &Router, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        app.clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn authorize_flow(h: &Harness) -> String {
        let response = get(&h.app, "/auth", None).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.contains("state=abc123"));

        let response = get(&h.app, "/auth/callback?code=xyz&state=abc123", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["expires_in"], 1800);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_server_health_endpoint() {
        let h = harness(ServerConfig::new()).await;
        let response = get(&h.app, "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["redirect_mode"], "static");
        assert!(body.get("tunnel").is_none());
    }

    #[tokio::test]
    async fn test_full_flow_then_expiry() {
        let h = harness(ServerConfig::new()).await;
        let token = authorize_flow(&h).await;

        let response = get(&h.app, "/auth/status", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["authorized"], true);
        assert_eq!(body["has_token"], true);
        let expires_in = body["expires_in"].as_i64().unwrap();
        assert!((1795..=1800).contains(&expires_in));

        h.clock.advance(TimeDelta::minutes(31));
        let response = get(&h.app, "/auth/status", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json(response).await;
        assert_eq!(body["authorized"], false);
        assert_eq!(body["reason"], "expired");
    }

    #[tokio::test]
    async fn test_callback_replay_rejected() {
        let h = harness(ServerConfig::new()).await;
        authorize_flow(&h).await;

        let response = get(&h.app, "/auth/callback?code=xyz&state=abc123", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "no_pending_authorization");
    }

    #[tokio::test]
    async fn test_callback_state_mismatch() {
        let h = harness(ServerConfig::new()).await;
        get(&h.app, "/auth", None).await;

        let response = get(&h.app, "/auth/callback?code=xyz&state=forged", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "correlation_mismatch");
    }

    #[tokio::test]
    async fn test_callback_denied_by_user() {
        let h = harness(ServerConfig::new()).await;
        get(&h.app, "/auth", None).await;

        let response = get(&h.app, "/auth/callback?error=access_denied&state=abc123", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "provider_exchange_error");
    }

    #[tokio::test]
    async fn test_callback_without_code_consumes_pending() {
        let h = harness(ServerConfig::new()).await;
        get(&h.app, "/auth", None).await;

        let response = get(&h.app, "/auth/callback?state=abc123", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "provider_exchange_error");

        let response = get(&h.app, "/auth/callback?code=xyz&state=abc123", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "no_pending_authorization");
    }

    #[tokio::test]
    async fn test_post_auth_redirect() {
        let h = harness(ServerConfig::new().with_post_auth_redirect("https://app.example.test/"))
            .await;
        get(&h.app, "/auth", None).await;

        let response = get(&h.app, "/auth/callback?code=xyz&state=abc123", None).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://app.example.test/?token="));
    }

    #[tokio::test]
    async fn test_status_without_token() {
        let h = harness(ServerConfig::new()).await;
        let response = get(&h.app, "/auth/status", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["authorized"], false);
        assert_eq!(body["has_token"], false);
    }

    #[tokio::test]
    async fn test_status_with_garbage_token() {
        let h = harness(ServerConfig::new()).await;
        let response = get(&h.app, "/auth/status", Some("garbage")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json(response).await;
        assert_eq!(body["has_token"], true);
        assert_eq!(body["reason"], "malformed_token");
    }

    #[tokio::test]
    async fn test_logout() {
        let h = harness(ServerConfig::new()).await;
        let response = get(&h.app, "/auth/logout", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["success"], true);
    }

    #[tokio::test]
    async fn test_user_info_requires_session() {
        let h = harness(ServerConfig::new()).await;
        let response = get(&h.app, "/auth/user-info", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["reason"], "missing_token");

        let token = authorize_flow(&h).await;
        let response = get(&h.app, "/auth/user-info", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["user_info"]["name"], "Ada");
    }

    #[tokio::test]
    async fn test_static_redirect_uri_route() {
        let h = harness(ServerConfig::new()).await;
        let response = get(&h.app, "/tunnel/redirect-uri", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["redirect_uri"], CALLBACK);
        assert_eq!(body["mode"], "static");
    }

    #[tokio::test]
    async fn test_tunnel_routes_disabled_without_tunnel() {
        let h = harness(ServerConfig::new()).await;
        for uri in ["/tunnel/start", "/tunnel/stop", "/tunnel/status"] {
            let response = get(&h.app, uri, None).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(json(response).await["success"], false);
        }
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let provider_server = mock_provider().await;
        let issuer = Arc::new(SessionIssuer::new(SessionKey::generate().unwrap()));
        let provider = FeishuProvider::new(
            ProviderConfig::feishu("cli_test", "secret").with_api_base(provider_server.uri()),
        )
        .unwrap();
        let coordinator = AuthorizationCoordinator::new(
            Arc::new(provider),
            RedirectUriResolver::Static(CALLBACK.to_string()),
            issuer,
        );
        let server = Server::from_state(AppState::new(ServerConfig::new(), coordinator));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));

        let body = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json::<serde_json::Value>()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tunnel_mode_routes() {
        use docpulse_tunnel::{TunnelBackend, TunnelConfig, TunnelManager};
        use std::time::Duration;

        let provider_server = mock_provider().await;
        let backend = TunnelBackend::Custom {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo 'forwarding https://cb.example.test'; exec sleep 30".to_string(),
            ],
        };
        let tunnel = Arc::new(TunnelManager::new(
            TunnelConfig::new(backend, 5001)
                .with_start_timeout(Duration::from_secs(5))
                .with_stop_grace(Duration::from_millis(500)),
        ));
        let issuer = Arc::new(SessionIssuer::new(SessionKey::generate().unwrap()));
        let provider = FeishuProvider::new(
            ProviderConfig::feishu("cli_test", "secret").with_api_base(provider_server.uri()),
        )
        .unwrap();
        let coordinator = AuthorizationCoordinator::new(
            Arc::new(provider),
            RedirectUriResolver::Tunnel(tunnel),
            issuer,
        );
        let app = Server::from_state(AppState::new(ServerConfig::new(), coordinator)).router();

        let body = json(get(&app, "/health", None).await).await;
        assert_eq!(body["redirect_mode"], "tunnel");
        assert_eq!(body["tunnel"], "stopped");

        // No tunnel yet: nothing to send the provider to.
        let response = get(&app, "/auth", None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = get(&app, "/tunnel/redirect-uri", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(&app, "/tunnel/start", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["public_url"], "https://cb.example.test");
        assert_eq!(body["redirect_uri"], "https://cb.example.test/auth/callback");

        let body = json(get(&app, "/tunnel/status", None).await).await;
        assert_eq!(body["status"]["state"], "active");
        assert_eq!(json(get(&app, "/health", None).await).await["tunnel"], "active");
        assert_eq!(body["status"]["is_active"], true);
        assert_eq!(body["status"]["port"], 5001);

        let body = json(get(&app, "/tunnel/redirect-uri", None).await).await;
        assert_eq!(body["mode"], "tunnel");
        assert_eq!(body["redirect_uri"], "https://cb.example.test/auth/callback");

        let response = get(&app, "/auth", None).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.contains("cb.example.test%2Fauth%2Fcallback"));

        let response = get(&app, "/tunnel/stop", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(get(&app, "/tunnel/status", None).await).await;
        assert_eq!(body["status"]["state"], "stopped");
        assert_eq!(body["status"]["is_active"], false);
    }
}

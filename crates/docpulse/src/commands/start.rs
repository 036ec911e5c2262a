//! Start command - launches the docpulse server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Args;

use docpulse_config::{
    CALLBACK_PATH, ConfigError, DocpulseConfig, LoadedConfig, RedirectSetting, TunnelBackendKind,
    TunnelSection,
};
use docpulse_oauth::{
    AuthorizationCoordinator, FeishuProvider, ProviderConfig, RedirectUriResolver, SessionIssuer,
    SessionKey,
};
use docpulse_server::{AppState, Server, ServerConfig};
use docpulse_tunnel::{TunnelBackend, TunnelConfig, TunnelManager};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file and environment values.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Derive the redirect URI from a secure tunnel
    #[arg(long, conflicts_with = "no_tunnel")]
    pub tunnel: bool,

    /// Disable tunnel mode even if configured
    #[arg(long)]
    pub no_tunnel: bool,

    /// Static redirect URI (production mode, overrides config)
    #[arg(long)]
    pub redirect_uri: Option<String>,

    /// Path to config file (overrides default discovery)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    // ── Load configuration ──────────────────────────────────────────────

    let loaded = if let Some(ref config_path) = args.config {
        let config = docpulse_config::load_config_file(config_path)?;
        LoadedConfig {
            config,
            sources: vec![docpulse_config::discovery::ConfigSource {
                path: config_path.clone(),
                loaded: true,
            }],
            warnings: Vec::new(),
        }
    } else {
        let cwd = std::env::current_dir().ok();
        docpulse_config::load_config(cwd.as_deref())?
    };

    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }
    if ctx.verbose {
        for path in loaded.loaded_from() {
            tracing::debug!(path = %path.display(), "Config layer applied");
        }
    }

    let mut config = loaded.config;
    docpulse_config::apply_process_env(&mut config)?;
    apply_cli_overrides(&mut config, &args);

    // ── Validate ────────────────────────────────────────────────────────

    match config.validate() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!("{}", warning);
            }
        }
        Err(e @ ConfigError::WeakSigningSecret { .. }) => {
            bail!("{}. Generate one with `docpulse secret`.", e)
        }
        Err(e) => return Err(e.into()),
    }

    // ── Build components ────────────────────────────────────────────────

    let state = build_state(&config)?;
    let server = Server::from_state(state);

    tracing::info!(
        addr = %server.bind_address(),
        mode = match config.redirect_setting() {
            RedirectSetting::Static(_) => "static",
            RedirectSetting::Tunnel => "tunnel",
        },
        "docpulse starting"
    );

    server.run().await?;
    Ok(())
}

/// Fold command-line flags into the loaded configuration.
fn apply_cli_overrides(config: &mut DocpulseConfig, args: &StartArgs) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref bind) = args.bind {
        config.server.bind = bind.clone();
    }
    if args.tunnel {
        config.tunnel.enabled = true;
    }
    if args.no_tunnel {
        config.tunnel.enabled = false;
    }
    if let Some(ref uri) = args.redirect_uri {
        config.provider.redirect_uri = Some(uri.clone());
    }
}

/// Wire configuration into the server's application state.
pub fn build_state(config: &DocpulseConfig) -> Result<AppState> {
    let bind_address: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.bind, config.server.port
            )
        })?;

    let key = match config.session.signing_secret.as_deref() {
        Some(secret) => SessionKey::from_secret(secret)?,
        None => {
            tracing::info!("No signing secret configured; generated one for this process");
            SessionKey::generate()?
        }
    };
    let issuer = Arc::new(SessionIssuer::new(key));

    let provider = FeishuProvider::new(provider_config(config))?;

    let tunnel = if config.tunnel.enabled {
        Some(Arc::new(TunnelManager::new(tunnel_config(
            &config.tunnel,
            config.server.port,
        )?)))
    } else {
        None
    };

    let redirect = config.redirect_setting();
    let resolver = match (&redirect, &tunnel) {
        (RedirectSetting::Tunnel, Some(manager)) => RedirectUriResolver::Tunnel(manager.clone()),
        (RedirectSetting::Static(uri), _) => RedirectUriResolver::Static(uri.clone()),
        (RedirectSetting::Tunnel, None) => bail!("tunnel mode selected without a tunnel"),
    };
    let tunnel_mode = matches!(resolver, RedirectUriResolver::Tunnel(_));

    let coordinator = AuthorizationCoordinator::new(Arc::new(provider), resolver, issuer);

    let mut server_config = ServerConfig::new()
        .with_bind_address(bind_address)
        .with_request_logging(config.server.request_logging)
        .with_auto_start_tunnel(tunnel_mode && config.tunnel.auto_start);
    if let Some(ref target) = config.session.post_auth_redirect {
        server_config = server_config.with_post_auth_redirect(target.clone());
    }

    let mut state = AppState::new(server_config, coordinator);
    // Production mode with a tunnel configured: still manageable over HTTP.
    if !tunnel_mode && let Some(manager) = tunnel {
        state = state.with_tunnel(manager);
    }
    Ok(state)
}

fn provider_config(config: &DocpulseConfig) -> ProviderConfig {
    let section = &config.provider;
    let mut provider = ProviderConfig::feishu(
        section.app_id.clone(),
        section.app_secret.clone().unwrap_or_default(),
    )
    .with_scopes(section.scopes.clone())
    .with_timeout(Duration::from_secs(section.timeout_secs));
    if let Some(ref url) = section.authorize_url {
        provider = provider.with_authorize_url(url.clone());
    }
    if let Some(ref base) = section.api_base {
        provider = provider.with_api_base(base.clone());
    }
    provider
}

fn tunnel_config(section: &TunnelSection, port: u16) -> Result<TunnelConfig> {
    let backend = match section.backend {
        TunnelBackendKind::Ngrok => TunnelBackend::Ngrok,
        TunnelBackendKind::Cloudflared => TunnelBackend::Cloudflared,
        TunnelBackendKind::Custom => {
            let Some(program) = section.command.clone() else {
                bail!("tunnel.backend = \"custom\" requires tunnel.command");
            };
            TunnelBackend::Custom {
                program,
                args: section.args.clone(),
            }
        }
    };

    let mut tunnel = TunnelConfig::new(backend, port)
        .with_callback_path(CALLBACK_PATH)
        .with_start_timeout(Duration::from_secs(section.start_timeout_secs))
        .with_stop_grace(Duration::from_secs(section.stop_grace_secs));
    if section.backend != TunnelBackendKind::Custom
        && let Some(ref program) = section.command
    {
        tunnel = tunnel.with_program(program.clone());
    }
    Ok(tunnel)
}

//! docpulse - document platform authorization gateway
//!
//! Main entry point for the docpulse CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{secret, start};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// docpulse - document platform authorization gateway
#[derive(Parser)]
#[command(name = "docpulse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the authorization server
    Start(start::StartArgs),

    /// Print a freshly generated session signing secret
    Secret(secret::SecretArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `secret` output is meant for piping; keep the console quiet.
    let _guard = match cli.command {
        Commands::Secret(_) => None,
        _ => Some(init_tracing(cli.verbose)),
    };

    let ctx = commands::Context {
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Secret(args) => secret::run(args, &ctx),
    }
}

/// Console (human-readable) plus daily rolling JSON file under the config directory.
fn init_tracing(verbose: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = if verbose {
        "docpulse=debug,docpulse_server=debug,docpulse_oauth=debug,docpulse_tunnel=debug,docpulse_config=debug,tower_http=debug,info"
    } else {
        "docpulse=info,docpulse_server=info,docpulse_oauth=info,docpulse_tunnel=info,docpulse_config=info,warn"
    };

    let log_dir = docpulse_config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "docpulse.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "docpulse=trace,docpulse_server=trace,docpulse_oauth=trace,docpulse_tunnel=trace,docpulse_config=trace,info",
                )),
        )
        .init();

    guard
}

//! Secret command - prints a signing secret suitable for `DOCPULSE_SIGNING_SECRET`.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the secret command.
#[derive(Args, Debug)]
pub struct SecretArgs {
    /// Print only the secret, without the usage hint
    #[arg(short, long)]
    pub quiet: bool,
}

/// Run the secret command.
pub fn run(args: SecretArgs, _ctx: &Context) -> Result<()> {
    let secret = docpulse_oauth::generate_secret();
    println!("{}", secret);
    if !args.quiet {
        eprintln!(
            "Export it as {} or set session.signing_secret in docpulse.toml",
            docpulse_config::env::SIGNING_SECRET_ENV
        );
    }
    Ok(())
}

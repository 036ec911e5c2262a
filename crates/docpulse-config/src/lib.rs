//! Configuration system for docpulse.
//!
//! Provides TOML-based configuration with:
//! - Config file layering (user config dir + project-local overrides)
//! - Environment overrides for provider credentials, signing secret and tunnel mode
//! - Redirect mode resolution (static callback address vs. tunnel-provided address)
//!
//! Configuration is read once at process start; nothing here is consulted per request.

pub mod discovery;
pub mod env;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, xdg_config_dir,
    xdg_config_path,
};
pub use env::{apply_env_overrides, apply_process_env};
pub use error::{ConfigError, Result};
pub use types::*;

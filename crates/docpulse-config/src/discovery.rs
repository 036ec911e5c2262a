//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/docpulse/config.toml` (user config)
//! 2. `./docpulse.toml` (project-local)
//! 3. Environment variables (see [`crate::env`])
//! 4. CLI arguments (handled externally)
//!
//! Layers are merged key-by-key, so a project file that only sets `[tunnel] enabled`
//! keeps every other value from the user file.

use std::path::{Path, PathBuf};

use crate::env::SIGNING_SECRET_ENV;
use crate::{ConfigError, DocpulseConfig, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "docpulse.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for config directory resolution.
const APP_NAME: &str = "docpulse";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "DOCPULSE_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: DocpulseConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
    /// Warnings generated during loading (unreadable layers, plaintext secrets).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration by discovering and merging all config file layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Load configuration with explicit control over the user config directory.
///
/// `config_dir` overrides both `DOCPULSE_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut merged = toml::Table::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => xdg_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut merged, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut merged, &project_path, &mut warnings));

    let config: DocpulseConfig = toml::Value::Table(merged).try_into()?;
    check_plaintext_secrets(&config, &mut warnings);

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<DocpulseConfig> {
    let table = read_table(path)?;
    Ok(toml::Value::Table(table).try_into()?)
}

/// Get the user config file path for docpulse.
///
/// Checks `DOCPULSE_CONFIG_DIR` first, then falls back to the platform default
/// (`~/.config/docpulse/config.toml` on Linux).
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the user config directory for docpulse.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(contents.parse::<toml::Table>()?)
}

/// Try to load a config file and merge it into the accumulated table.
///
/// A malformed layer is skipped with a warning; startup continues with the other layers.
fn load_layer(merged: &mut toml::Table, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    let loaded = match read_table(path) {
        Ok(layer) => {
            // Reject layers whose values don't fit the schema before merging them in.
            match toml::Value::Table(layer.clone()).try_into::<DocpulseConfig>() {
                Ok(_) => {
                    tracing::debug!(path = %path.display(), "Loaded config layer");
                    merge_tables(merged, layer);
                    true
                }
                Err(e) => {
                    warnings.push(format!("Failed to load {}: {}", path.display(), e));
                    false
                }
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            false
        }
    };

    ConfigSource {
        path: path.to_path_buf(),
        loaded,
    }
}

/// Recursively merge `overlay` into `base`. Tables merge, everything else replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn check_plaintext_secrets(config: &DocpulseConfig, warnings: &mut Vec<String>) {
    if config.provider.app_secret.is_some() {
        warnings.push(
            "[provider] app_secret is stored in a config file. \
             Consider setting FEISHU_APP_SECRET instead."
                .to_string(),
        );
    }
    if config.session.signing_secret.is_some() {
        warnings.push(format!(
            "[session] signing_secret is stored in a config file. \
             Consider setting {} instead.",
            SIGNING_SECRET_ENV
        ));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

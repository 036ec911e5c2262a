//! Environment overrides.
//!
//! | Variable                   | Field                       |
//! |----------------------------|-----------------------------|
//! | `FEISHU_APP_ID`            | `provider.app_id`           |
//! | `FEISHU_APP_SECRET`        | `provider.app_secret`       |
//! | `DOCPULSE_REDIRECT_URI`    | `provider.redirect_uri`     |
//! | `DOCPULSE_SIGNING_SECRET`  | `session.signing_secret`    |
//! | `DOCPULSE_USE_TUNNEL`      | `tunnel.enabled`            |
//! | `DOCPULSE_TUNNEL_BACKEND`  | `tunnel.backend`            |
//! | `DOCPULSE_PORT`            | `server.port`               |
//! | `DOCPULSE_BIND`            | `server.bind`               |
//!
//! Empty values are treated as unset.

use crate::{ConfigError, DocpulseConfig, Result, TunnelBackendKind};

pub const APP_ID_ENV: &str = "FEISHU_APP_ID";
pub const APP_SECRET_ENV: &str = "FEISHU_APP_SECRET";
pub const REDIRECT_URI_ENV: &str = "DOCPULSE_REDIRECT_URI";
pub const SIGNING_SECRET_ENV: &str = "DOCPULSE_SIGNING_SECRET";
pub const USE_TUNNEL_ENV: &str = "DOCPULSE_USE_TUNNEL";
pub const TUNNEL_BACKEND_ENV: &str = "DOCPULSE_TUNNEL_BACKEND";
pub const PORT_ENV: &str = "DOCPULSE_PORT";
pub const BIND_ENV: &str = "DOCPULSE_BIND";

/// Apply overrides from the process environment.
pub fn apply_process_env(config: &mut DocpulseConfig) -> Result<()> {
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides from an arbitrary variable source.
pub fn apply_env_overrides<F>(config: &mut DocpulseConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = get(APP_ID_ENV) {
        config.provider.app_id = v;
    }
    if let Some(v) = get(APP_SECRET_ENV) {
        config.provider.app_secret = Some(v);
    }
    if let Some(v) = get(REDIRECT_URI_ENV) {
        config.provider.redirect_uri = Some(v);
    }
    if let Some(v) = get(SIGNING_SECRET_ENV) {
        config.session.signing_secret = Some(v);
    }
    if let Some(v) = get(USE_TUNNEL_ENV) {
        config.tunnel.enabled = parse_bool(USE_TUNNEL_ENV, &v)?;
    }
    if let Some(v) = get(TUNNEL_BACKEND_ENV) {
        config.tunnel.backend = v.parse::<TunnelBackendKind>()?;
    }
    if let Some(v) = get(PORT_ENV) {
        config.server.port = v.parse().map_err(|_| ConfigError::InvalidValue {
            key: PORT_ENV.to_string(),
            value: v.clone(),
        })?;
    }
    if let Some(v) = get(BIND_ENV) {
        config.server.bind = v;
    }

    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = DocpulseConfig::new();
        apply_env_overrides(
            &mut config,
            vars(&[
                ("FEISHU_APP_ID", "cli_env"),
                ("FEISHU_APP_SECRET", "env-secret"),
                ("DOCPULSE_USE_TUNNEL", "true"),
                ("DOCPULSE_PORT", "8080"),
                ("DOCPULSE_TUNNEL_BACKEND", "cloudflared"),
            ]),
        )
        .unwrap();

        assert_eq!(config.provider.app_id, "cli_env");
        assert_eq!(config.provider.app_secret.as_deref(), Some("env-secret"));
        assert!(config.tunnel.enabled);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.tunnel.backend, TunnelBackendKind::Cloudflared);
    }

    #[test]
    fn test_empty_values_ignored() {
        let mut config = DocpulseConfig::new();
        config.provider.app_id = "from_file".to_string();
        apply_env_overrides(&mut config, vars(&[("FEISHU_APP_ID", "")])).unwrap();
        assert_eq!(config.provider.app_id, "from_file");
    }

    #[test]
    fn test_tunnel_flag_forms() {
        for (raw, expected) in [("1", true), ("off", false), ("YES", true)] {
            let mut config = DocpulseConfig::new();
            apply_env_overrides(&mut config, vars(&[("DOCPULSE_USE_TUNNEL", raw)])).unwrap();
            assert_eq!(config.tunnel.enabled, expected, "value {raw}");
        }
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut config = DocpulseConfig::new();
        let err = apply_env_overrides(&mut config, vars(&[("DOCPULSE_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DOCPULSE_PORT"));
    }

    #[test]
    fn test_invalid_tunnel_flag_rejected() {
        let mut config = DocpulseConfig::new();
        assert!(apply_env_overrides(&mut config, vars(&[("DOCPULSE_USE_TUNNEL", "maybe")])).is_err());
    }
}

use std::path::{Path, PathBuf};

use super::types::AppConfig;
use crate::error::ConfigError;
use crate::headless::HEADLESS_URL_ENV;

/// Get the default nestlog data directory: ~/.nestlog
pub fn get_nestlog_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".nestlog"))
        .ok_or(ConfigError::NoHome)
}

pub fn load_default() -> Result<AppConfig, ConfigError> {
    // Priority 1: ~/.nestlog/config.toml
    let data_dir = get_nestlog_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg = if user_config.exists() {
        load_from(&user_config)?
    } else if local_config.exists() {
        load_from(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str::<AppConfig>(&s).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Environment variable overrides (highest priority).
pub fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var(HEADLESS_URL_ENV) {
        if !v.trim().is_empty() {
            cfg.headless.url = v.trim().to_string();
            cfg.headless.enabled = true;
        }
    }
}

fn validate(cfg: &AppConfig) -> Result<(), ConfigError> {
    if cfg.headless.max_buffer_bytes == 0 {
        return Err(ConfigError::Invalid {
            field: "headless.max_buffer_bytes",
            value: "0".to_string(),
        });
    }
    if cfg.headless.connect_timeout_ms == 0 {
        return Err(ConfigError::Invalid {
            field: "headless.connect_timeout_ms",
            value: "0".to_string(),
        });
    }
    let url = cfg.headless.url.as_str();
    if cfg.headless.enabled && !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(ConfigError::Invalid {
            field: "headless.url",
            value: url.to_string(),
        });
    }
    Ok(())
}

/// Resolve `[tunnel].socket_dir`, expanding `~` and environment variables.
pub fn resolve_socket_dir(cfg: &AppConfig) -> Option<PathBuf> {
    let raw = cfg.tunnel.socket_dir.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    match shellexpand::full(raw) {
        Ok(expanded) => Some(PathBuf::from(expanded.as_ref())),
        Err(e) => {
            tracing::warn!(target: "nestlog.config", error = %e, "cannot expand socket_dir; using it verbatim");
            Some(PathBuf::from(raw))
        }
    }
}

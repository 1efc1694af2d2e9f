use thiserror::Error;

use super::tunnel::TunnelError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("tunnel failed: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot determine home directory")]
    NoHome,
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

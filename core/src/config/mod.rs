mod load;
mod types;

pub use load::{apply_env_overrides, get_nestlog_data_dir, load_default, load_from, resolve_socket_dir};
pub use types::{AppConfig, HeadlessConfig, LoggingConfig, TunnelConfig};

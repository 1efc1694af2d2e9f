use serde::{Deserialize, Serialize};

use crate::headless::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEADLESS_URL, DEFAULT_MAX_BUFFER_BYTES,
    DEFAULT_RECONNECT_INTERVAL_MS,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub tunnel: TunnelConfig,

    #[serde(default)]
    pub headless: HeadlessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "nestlog=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,

    /// Print `debug` sink calls on the console; also raises the `nestlog` tracing targets to debug.
    #[serde(default)]
    pub verbose: bool,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Where `run` creates its socket. Supports `~` and `$VAR`; OS temp dir if unset.
    #[serde(default)]
    pub socket_dir: Option<String>,

    /// Deadline for prompts sent by `emit prompt` when the request carries none.
    #[serde(default)]
    pub prompt_timeout_ms: Option<u64>,

    /// Flush budget for the upstream client on shutdown.
    #[serde(default = "default_destroy_timeout_ms")]
    pub destroy_timeout_ms: u64,
}

fn default_destroy_timeout_ms() -> u64 {
    2_000
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            socket_dir: None,
            prompt_timeout_ms: None,
            destroy_timeout_ms: default_destroy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_headless_url")]
    pub url: String,

    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Deadline for one connect attempt, WebSocket handshake included.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_headless_destroy_timeout_ms")]
    pub destroy_timeout_ms: u64,
}

fn default_headless_url() -> String {
    DEFAULT_HEADLESS_URL.to_string()
}

fn default_max_buffer_bytes() -> usize {
    DEFAULT_MAX_BUFFER_BYTES
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_headless_destroy_timeout_ms() -> u64 {
    5_000
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_headless_url(),
            max_buffer_bytes: default_max_buffer_bytes(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            destroy_timeout_ms: default_headless_destroy_timeout_ms(),
        }
    }
}

//! Remote viewer binding: a reconnecting WebSocket stream of everything the host logs.

mod adapter;
mod buffer;

use std::time::Duration;

pub use adapter::{AdapterPhase, HeadlessAdapter};
pub use buffer::{EntryId, OutputBuffer, QueuedEntry};

use crate::config::HeadlessConfig;

/// Set to point the adapter at a different remote viewer.
pub const HEADLESS_URL_ENV: &str = "NESTLOG_HEADLESS_URL";
pub const DEFAULT_HEADLESS_URL: &str = "ws://localhost:8123/nestlog-agent";
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    /// Byte budget for replay history (and therefore for the live queue).
    pub max_buffer_bytes: usize,
    /// Minimum gap between two connection attempts.
    pub reconnect_interval: Duration,
    /// A connect attempt (TCP plus handshake) that takes longer counts as failed.
    pub connect_timeout: Duration,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl From<&HeadlessConfig> for HeadlessOptions {
    fn from(cfg: &HeadlessConfig) -> Self {
        Self {
            max_buffer_bytes: cfg.max_buffer_bytes,
            reconnect_interval: Duration::from_millis(cfg.reconnect_interval_ms),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
        }
    }
}

//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `nestlog_core::api` instead of reaching into internal modules.

pub use crate::config::{
    load_default, resolve_socket_dir, AppConfig, HeadlessConfig, LoggingConfig, TunnelConfig,
};
pub use crate::error::{CliError, ConfigError, TunnelError, TunnelErrorKind};
pub use crate::frame::{encode_frame, parse_frame, FrameDecoder};
pub use crate::headless::{
    AdapterPhase, HeadlessAdapter, HeadlessOptions, DEFAULT_HEADLESS_URL, HEADLESS_URL_ENV,
};
pub use crate::prompt::{ErrorResponsePolicy, PromptCancel, PromptRegistry, PromptWait};
pub use crate::protocol::{
    HeadlessMessage, HeadlessServerMessage, PromptChoice, PromptConfig, PromptKind, PromptRequest,
    PromptResponse, ServerTunnelMessage, SessionInfo, StructuredMessage, TerminalInfo,
    TunnelMessage, PROMPT_REQUEST_TYPE,
};
pub use crate::sink::{Logger, LoggerSink, MemorySink, SinkCall};
pub use crate::tunnel::{
    socket_from_env, socket_path_in, PromptHandler, PromptResponder, TunnelClient, TunnelServer,
    TunnelServerOptions, UserInputHandler, TUNNEL_SOCKET_ENV,
};

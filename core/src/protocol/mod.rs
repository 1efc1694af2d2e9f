//! Message vocabularies shared by the local socket tunnel and the headless transport.

pub mod headless;
pub mod message;
pub mod prompt;

pub use headless::{HeadlessMessage, HeadlessServerMessage, SessionInfo, TerminalInfo};
pub use message::{
    PromptResponse, ServerTunnelMessage, StructuredMessage, TunnelMessage, PROMPT_REQUEST_TYPE,
};
pub use prompt::{PromptChoice, PromptConfig, PromptKind, PromptRequest};

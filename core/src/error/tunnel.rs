use thiserror::Error;

/// Coarse classification used by callers that only care about the recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelErrorKind {
    /// Malformed frame or message shape. Never surfaced by the transports themselves.
    Framing,
    /// Connect failure, write failure or unexpected close.
    Connection,
    /// Explicit error carried by a prompt response, or a prompt wait that ended abnormally.
    Prompt,
    /// Prompt wait exceeded its deadline.
    Timeout,
    /// The owning transport was destroyed.
    Shutdown,
}

#[derive(Error, Debug, Clone)]
pub enum TunnelError {
    #[error("io error: {0}")]
    Io(String),

    #[error("invalid frame: {0}")]
    Frame(String),

    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("tunnel connection lost")]
    ConnectionLost,

    #[error("tunnel destroyed")]
    Destroyed,

    #[error("prompt {request_id} timed out after {timeout_ms}ms")]
    PromptTimeout { request_id: String, timeout_ms: u64 },

    #[error("prompt {0} was cancelled")]
    Cancelled(String),

    #[error("prompt {request_id} rejected: {message}")]
    PromptRejected { request_id: String, message: String },

    #[error("prompt {0} is already pending")]
    DuplicateRequest(String),

    #[error("invalid prompt request: {0}")]
    InvalidPromptRequest(String),
}

impl TunnelError {
    pub fn kind(&self) -> TunnelErrorKind {
        match self {
            Self::Frame(_) => TunnelErrorKind::Framing,
            Self::Io(_) | Self::Connect { .. } | Self::WebSocket(_) | Self::ConnectionLost => {
                TunnelErrorKind::Connection
            }
            Self::PromptTimeout { .. } => TunnelErrorKind::Timeout,
            Self::Destroyed => TunnelErrorKind::Shutdown,
            Self::Cancelled(_)
            | Self::PromptRejected { .. }
            | Self::DuplicateRequest(_)
            | Self::InvalidPromptRequest(_) => TunnelErrorKind::Prompt,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == TunnelErrorKind::Timeout
    }
}

impl From<std::io::Error> for TunnelError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TunnelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Frame(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TunnelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_recovery_paths() {
        assert_eq!(TunnelError::ConnectionLost.kind(), TunnelErrorKind::Connection);
        assert_eq!(TunnelError::Destroyed.kind(), TunnelErrorKind::Shutdown);
        assert!(TunnelError::PromptTimeout {
            request_id: "r".into(),
            timeout_ms: 100
        }
        .is_timeout());
        assert_eq!(
            TunnelError::Frame("bad".into()).kind(),
            TunnelErrorKind::Framing
        );
    }
}

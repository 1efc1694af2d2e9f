use std::sync::Arc;

use super::LoggerSink;
use crate::protocol::StructuredMessage;
use crate::tunnel::{socket_from_env, TunnelClient};

/// Cheap, clonable handle threaded through calls instead of a process-wide logger.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LoggerSink>,
}

impl Logger {
    pub fn new(sink: Arc<dyn LoggerSink>) -> Self {
        Self { sink }
    }

    /// Route through the parent's tunnel when `NESTLOG_TUNNEL_SOCKET` names one we can reach,
    /// otherwise stay on `local`. The client is returned so the caller can prompt and shut it down.
    pub async fn from_env(local: Arc<dyn LoggerSink>) -> (Self, Option<TunnelClient>) {
        let Some(path) = socket_from_env() else {
            return (Self::new(local), None);
        };

        match TunnelClient::connect(&path).await {
            Ok(client) => {
                let sink: Arc<dyn LoggerSink> = Arc::new(client.clone());
                (Self::new(sink), Some(client))
            }
            Err(e) => {
                tracing::debug!(
                    target: "nestlog.tunnel",
                    path = %path,
                    error = %e,
                    "tunnel socket unreachable, logging locally"
                );
                (Self::new(local), None)
            }
        }
    }

    pub fn sink(&self) -> Arc<dyn LoggerSink> {
        self.sink.clone()
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.sink.log(&[msg.into()]);
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.sink.error(&[msg.into()]);
    }

    pub fn warn(&self, msg: impl Into<String>) {
        self.sink.warn(&[msg.into()]);
    }

    pub fn debug(&self, msg: impl Into<String>) {
        self.sink.debug(&[msg.into()]);
    }

    /// Multi-argument log line; each argument is formatted with `Display`.
    pub fn log_args<I, T>(&self, args: I)
    where
        I: IntoIterator<Item = T>,
        T: std::fmt::Display,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.to_string()).collect();
        self.sink.log(&args);
    }

    pub fn stdout(&self, data: &str) {
        self.sink.write_stdout(data);
    }

    pub fn stderr(&self, data: &str) {
        self.sink.write_stderr(data);
    }

    pub fn structured(&self, message: StructuredMessage) {
        self.sink.send_structured(message);
    }
}

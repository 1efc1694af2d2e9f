//! The logging surface every transport plugs into.

mod logger;
mod memory;

pub use logger::Logger;
pub use memory::{MemorySink, SinkCall};

use crate::protocol::{StructuredMessage, TunnelMessage};

/// Host-side logging operations. Implementations must not block: every call is made
/// from the middle of a transport's read loop or a caller's hot path.
pub trait LoggerSink: Send + Sync {
    fn log(&self, args: &[String]);
    fn error(&self, args: &[String]);
    fn warn(&self, args: &[String]);
    fn debug(&self, args: &[String]);
    fn write_stdout(&self, data: &str);
    fn write_stderr(&self, data: &str);
    fn send_structured(&self, message: StructuredMessage);
}

/// Replay one decoded tunnel message onto a sink.
pub fn dispatch(sink: &dyn LoggerSink, message: TunnelMessage) {
    match message {
        TunnelMessage::Log { args } => sink.log(&args),
        TunnelMessage::Error { args } => sink.error(&args),
        TunnelMessage::Warn { args } => sink.warn(&args),
        TunnelMessage::Debug { args } => sink.debug(&args),
        TunnelMessage::Stdout { data } => sink.write_stdout(&data),
        TunnelMessage::Stderr { data } => sink.write_stderr(&data),
        TunnelMessage::Structured { message } => sink.send_structured(message),
    }
}

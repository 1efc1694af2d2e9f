use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::LoggerSink;
use crate::protocol::StructuredMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Log(Vec<String>),
    Error(Vec<String>),
    Warn(Vec<String>),
    Debug(Vec<String>),
    Stdout(String),
    Stderr(String),
    Structured(StructuredMessage),
}

/// Records every call in order.
#[derive(Clone, Default)]
pub struct MemorySink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    changed: Arc<Notify>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `n` calls have been recorded.
    pub async fn wait_for_len(&self, n: usize) {
        loop {
            let notified = self.changed.notified();
            if self.len() >= n {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().push(call);
        self.changed.notify_waiters();
    }
}

impl LoggerSink for MemorySink {
    fn log(&self, args: &[String]) {
        self.record(SinkCall::Log(args.to_vec()));
    }

    fn error(&self, args: &[String]) {
        self.record(SinkCall::Error(args.to_vec()));
    }

    fn warn(&self, args: &[String]) {
        self.record(SinkCall::Warn(args.to_vec()));
    }

    fn debug(&self, args: &[String]) {
        self.record(SinkCall::Debug(args.to_vec()));
    }

    fn write_stdout(&self, data: &str) {
        self.record(SinkCall::Stdout(data.to_string()));
    }

    fn write_stderr(&self, data: &str) {
        self.record(SinkCall::Stderr(data.to_string()));
    }

    fn send_structured(&self, message: StructuredMessage) {
        self.record(SinkCall::Structured(message));
    }
}

use nestlog_core::api::{LoggerSink, StructuredMessage};

/// Sink that turns every call into a `tracing` event under `nestlog.sink`.
///
/// Useful for daemons where stdout is not watched; pair it with a file layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LoggerSink for TracingSink {
    fn log(&self, args: &[String]) {
        tracing::info!(target: "nestlog.sink", "{}", args.join(" "));
    }

    fn error(&self, args: &[String]) {
        tracing::error!(target: "nestlog.sink", "{}", args.join(" "));
    }

    fn warn(&self, args: &[String]) {
        tracing::warn!(target: "nestlog.sink", "{}", args.join(" "));
    }

    fn debug(&self, args: &[String]) {
        tracing::debug!(target: "nestlog.sink", "{}", args.join(" "));
    }

    fn write_stdout(&self, data: &str) {
        tracing::info!(target: "nestlog.sink", stream = "stdout", "{}", data.trim_end());
    }

    fn write_stderr(&self, data: &str) {
        tracing::info!(target: "nestlog.sink", stream = "stderr", "{}", data.trim_end());
    }

    fn send_structured(&self, message: StructuredMessage) {
        tracing::info!(
            target: "nestlog.sink",
            kind = %message.kind,
            fields = %serde_json::Value::Object(message.fields),
            "structured event"
        );
    }
}

use std::io::Write;

use nestlog_core::api::{LoggerSink, PromptRequest, StructuredMessage};
use parking_lot::Mutex;

type Out = Box<dyn Write + Send>;

/// Terminal sink: log/debug to stdout, error/warn to stderr, raw streams passed through.
pub struct ConsoleSink {
    out: Mutex<Out>,
    err: Mutex<Out>,
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self::with_writers(Box::new(std::io::stdout()), Box::new(std::io::stderr()), verbose)
    }

    pub fn with_writers(out: Out, err: Out, verbose: bool) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
            verbose,
        }
    }

    fn line(target: &Mutex<Out>, prefix: &str, args: &[String]) {
        let mut w = target.lock();
        let _ = writeln!(w, "{prefix}{}", args.join(" "));
        let _ = w.flush();
    }

    fn raw(target: &Mutex<Out>, data: &str) {
        let mut w = target.lock();
        let _ = w.write_all(data.as_bytes());
        let _ = w.flush();
    }
}

/// One-line rendering of a structured event.
pub fn summarize_structured(message: &StructuredMessage) -> String {
    if let Some(prompt) = PromptRequest::from_structured(message) {
        return format!(
            "[prompt {}] {}",
            serde_json::to_value(prompt.prompt_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            prompt.prompt_config.message
        );
    }
    let fields = serde_json::to_string(&message.fields).unwrap_or_default();
    format!("[{}] {}", message.kind, fields)
}

impl LoggerSink for ConsoleSink {
    fn log(&self, args: &[String]) {
        Self::line(&self.out, "", args);
    }

    fn error(&self, args: &[String]) {
        Self::line(&self.err, "error: ", args);
    }

    fn warn(&self, args: &[String]) {
        Self::line(&self.err, "warn: ", args);
    }

    fn debug(&self, args: &[String]) {
        if self.verbose {
            Self::line(&self.out, "debug: ", args);
        }
    }

    fn write_stdout(&self, data: &str) {
        Self::raw(&self.out, data);
    }

    fn write_stderr(&self, data: &str) {
        Self::raw(&self.err, data);
    }

    fn send_structured(&self, message: StructuredMessage) {
        let ts = chrono::Local::now().format("%H:%M:%S");
        let summary = summarize_structured(&message);
        let mut w = self.err.lock();
        let _ = writeln!(w, "{ts} {summary}");
        let _ = w.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestlog_core::api::PromptKind;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn console(verbose: bool) -> (ConsoleSink, Shared, Shared) {
        let (out, err) = (Shared::default(), Shared::default());
        let sink = ConsoleSink::with_writers(Box::new(out.clone()), Box::new(err.clone()), verbose);
        (sink, out, err)
    }

    #[test]
    fn routes_levels_to_streams() {
        let (sink, out, err) = console(false);
        sink.log(&["hello".into(), "world".into()]);
        sink.debug(&["hidden".into()]);
        sink.warn(&["careful".into()]);
        sink.error(&["broken".into()]);
        sink.write_stdout("partial");
        sink.write_stderr("raw\n");

        assert_eq!(out.text(), "hello world\npartial");
        assert_eq!(err.text(), "warn: careful\nerror: broken\nraw\n");
    }

    #[test]
    fn verbose_shows_debug() {
        let (sink, out, _err) = console(true);
        sink.debug(&["shown".into()]);
        assert_eq!(out.text(), "debug: shown\n");
    }

    #[test]
    fn prompt_requests_get_a_readable_summary() {
        let req = PromptRequest::new(PromptKind::Confirm, "Deploy now?").into_structured();
        assert_eq!(summarize_structured(&req), "[prompt confirm] Deploy now?");

        let other = StructuredMessage::new("progress").with_field("pct", 50);
        assert_eq!(summarize_structured(&other), "[progress] {\"pct\":50}");
    }
}

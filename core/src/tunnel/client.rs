use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TunnelError;
use crate::frame::{encode_frame, FrameDecoder};
use crate::prompt::{ErrorResponsePolicy, PromptRegistry};
use crate::protocol::{PromptRequest, ServerTunnelMessage, StructuredMessage, TunnelMessage};
use crate::sink::LoggerSink;

const READ_CHUNK: usize = 16 * 1024;

/// Callback for `user_input` messages pushed down by the parent.
pub type UserInputHandler = Arc<dyn Fn(String) -> anyhow::Result<()> + Send + Sync>;

/// Child end of the local tunnel.
///
/// Logging calls never block and never fail: when the connection is not writable they
/// are dropped. Prompts are the only calls that report transport failure.
#[derive(Clone)]
pub struct TunnelClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    endpoint: String,
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    writable: AtomicBool,
    destroyed: AtomicBool,
    prompts: PromptRegistry,
    user_input: Mutex<Option<UserInputHandler>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl TunnelClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, TunnelError> {
        let endpoint = path.as_ref().display().to_string();
        let stream = UnixStream::connect(path.as_ref())
            .await
            .map_err(|e| TunnelError::Connect {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        let (rd, wr) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<String>();

        let inner = Arc::new(ClientInner {
            endpoint,
            writer: Mutex::new(Some(tx)),
            writable: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            prompts: PromptRegistry::new("tunnel-client", ErrorResponsePolicy::Reject),
            user_input: Mutex::new(None),
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(None),
        });

        let writer_task = tokio::spawn(write_loop(wr, rx, Arc::downgrade(&inner)));
        let reader_task = tokio::spawn(read_loop(rd, Arc::downgrade(&inner)));
        *inner.writer_task.lock() = Some(writer_task);
        *inner.reader_task.lock() = Some(reader_task);

        tracing::debug!(target: "nestlog.tunnel", endpoint = %inner.endpoint, "tunnel client connected");
        Ok(Self { inner })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.inner.writable.load(Ordering::SeqCst)
    }

    pub fn pending_prompts(&self) -> usize {
        self.inner.prompts.pending_count()
    }

    pub fn send(&self, message: &TunnelMessage) {
        if !self.is_connected() {
            return;
        }
        let line = match encode_frame(message) {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(target: "nestlog.tunnel", error = %e, "failed to encode frame");
                return;
            }
        };
        if let Some(tx) = self.inner.writer.lock().as_ref() {
            let _ = tx.send(line);
        }
    }

    /// Send a `prompt_request` and wait for the matching `prompt_response`.
    pub async fn send_prompt_request(
        &self,
        request: StructuredMessage,
        timeout: Option<Duration>,
    ) -> Result<Value, TunnelError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(TunnelError::Destroyed);
        }
        let request_id = request
            .request_id()
            .ok_or_else(|| TunnelError::InvalidPromptRequest("missing requestId".to_string()))?
            .to_string();
        if !self.is_connected() {
            return Err(TunnelError::ConnectionLost);
        }

        let wait = self.inner.prompts.wait_for(&request_id)?;
        self.send(&TunnelMessage::Structured { message: request });
        // The connection may have dropped between the check above and registration,
        // after the bulk rejection already ran.
        if !self.is_connected() {
            self.inner
                .prompts
                .reject(&request_id, TunnelError::ConnectionLost);
        }
        wait.result_with_timeout(timeout).await
    }

    /// Typed convenience over [`TunnelClient::send_prompt_request`]; uses the request's own timeout.
    pub async fn prompt(&self, request: PromptRequest) -> Result<Value, TunnelError> {
        let timeout = request.timeout_ms.map(Duration::from_millis);
        self.send_prompt_request(request.into_structured(), timeout)
            .await
    }

    /// Install or clear the `user_input` callback. Only one is active at a time.
    pub fn set_user_input_handler(&self, handler: Option<UserInputHandler>) {
        *self.inner.user_input.lock() = handler;
    }

    /// Stop writing, reject pending prompts, then give already-queued frames up to
    /// `timeout` to reach the socket before releasing it.
    pub async fn destroy(&self, timeout: Duration) {
        let Some(writer_task) = self.inner.begin_destroy() else {
            return;
        };
        let abort = writer_task.abort_handle();
        if tokio::time::timeout(timeout, writer_task).await.is_err() {
            tracing::debug!(target: "nestlog.tunnel", "flush timed out; dropping unsent frames");
            abort.abort();
        }
    }

    /// Non-suspending variant of [`TunnelClient::destroy`]; queued frames are flushed in the background.
    pub fn destroy_sync(&self) {
        let _ = self.inner.begin_destroy();
    }
}

impl ClientInner {
    fn begin_destroy(&self) -> Option<JoinHandle<()>> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.writable.store(false, Ordering::SeqCst);
        self.prompts.reject_all(TunnelError::Destroyed);
        // Closing the channel lets the writer drain what is queued and shut the socket down.
        self.writer.lock().take();
        if let Some(reader) = self.reader_task.lock().take() {
            reader.abort();
        }
        self.writer_task.lock().take()
    }

    fn connection_lost(&self) {
        let was_writable = self.writable.swap(false, Ordering::SeqCst);
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let rejected = self.prompts.reject_all(TunnelError::ConnectionLost);
        if was_writable {
            tracing::debug!(
                target: "nestlog.tunnel",
                endpoint = %self.endpoint,
                rejected,
                "tunnel connection lost"
            );
        }
    }

    fn handle_server_message(&self, message: ServerTunnelMessage) {
        match message {
            ServerTunnelMessage::PromptResponse(response) => {
                self.prompts.settle(response);
            }
            ServerTunnelMessage::UserInput { content } => {
                let handler = self.user_input.lock().clone();
                deliver_user_input(handler, content);
            }
        }
    }
}

/// Run a user-input callback, containing its failures.
pub(crate) fn deliver_user_input(handler: Option<UserInputHandler>, content: String) {
    let Some(handler) = handler else {
        tracing::debug!(target: "nestlog.tunnel", "user input received with no handler");
        return;
    };
    match std::panic::catch_unwind(AssertUnwindSafe(|| handler(content))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(target: "nestlog.tunnel", error = %e, "user input handler failed");
        }
        Err(_) => {
            tracing::warn!(target: "nestlog.tunnel", "user input handler panicked");
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(reader) = self.reader_task.get_mut().take() {
            reader.abort();
        }
    }
}

async fn write_loop(
    mut wr: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
    inner: Weak<ClientInner>,
) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = wr.write_all(line.as_bytes()).await {
            tracing::debug!(target: "nestlog.tunnel", error = %e, "tunnel write failed");
            if let Some(inner) = inner.upgrade() {
                inner.connection_lost();
            }
            return;
        }
    }
    let _ = wr.flush().await;
    let _ = wr.shutdown().await;
}

async fn read_loop(mut rd: OwnedReadHalf, inner: Weak<ClientInner>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match rd.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(target: "nestlog.tunnel", error = %e, "tunnel read failed");
                break;
            }
        };
        let messages = decoder.decode::<ServerTunnelMessage>(&buf[..n]);
        let Some(client) = inner.upgrade() else {
            return;
        };
        for message in messages {
            client.handle_server_message(message);
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.connection_lost();
    }
}

impl LoggerSink for TunnelClient {
    fn log(&self, args: &[String]) {
        self.send(&TunnelMessage::Log {
            args: args.to_vec(),
        });
    }

    fn error(&self, args: &[String]) {
        self.send(&TunnelMessage::Error {
            args: args.to_vec(),
        });
    }

    fn warn(&self, args: &[String]) {
        self.send(&TunnelMessage::Warn {
            args: args.to_vec(),
        });
    }

    fn debug(&self, args: &[String]) {
        self.send(&TunnelMessage::Debug {
            args: args.to_vec(),
        });
    }

    fn write_stdout(&self, data: &str) {
        self.send(&TunnelMessage::Stdout {
            data: data.to_string(),
        });
    }

    fn write_stderr(&self, data: &str) {
        self.send(&TunnelMessage::Stderr {
            data: data.to_string(),
        });
    }

    /// Prompt requests only travel up through [`TunnelClient::send_prompt_request`], which
    /// registers the correlation; forwarding one here would ask the parent twice.
    fn send_structured(&self, message: StructuredMessage) {
        if message.is_prompt_request() {
            tracing::trace!(
                target: "nestlog.tunnel",
                request_id = message.request_id().unwrap_or("<none>"),
                "prompt request left to the prompt path"
            );
            return;
        }
        self.send(&TunnelMessage::Structured { message });
    }
}

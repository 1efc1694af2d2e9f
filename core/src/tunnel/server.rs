use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};

use crate::error::TunnelError;
use crate::frame::{encode_frame, FrameDecoder};
use crate::protocol::{PromptResponse, ServerTunnelMessage, StructuredMessage, TunnelMessage};
use crate::sink::{self, LoggerSink};

const READ_CHUNK: usize = 16 * 1024;

/// Answers `prompt_request` messages arriving from children.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn handle_prompt(&self, request: StructuredMessage, responder: PromptResponder);
}

/// Reply channel bound to the connection a prompt arrived on.
#[derive(Clone)]
pub struct PromptResponder {
    request_id: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl PromptResponder {
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Resolves once the originating connection is gone and no answer can be delivered.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Returns false when the originating connection is gone.
    pub fn respond(&self, message: &ServerTunnelMessage) -> bool {
        match encode_frame(message) {
            Ok(line) => self.tx.send(line).is_ok(),
            Err(e) => {
                tracing::warn!(target: "nestlog.tunnel", error = %e, "failed to encode response");
                false
            }
        }
    }

    pub fn respond_value(&self, value: Value) -> bool {
        let Some(id) = self.request_id.as_deref() else {
            return false;
        };
        self.respond(&ServerTunnelMessage::PromptResponse(PromptResponse::value(
            id, value,
        )))
    }

    pub fn respond_error(&self, error: impl Into<String>) -> bool {
        let Some(id) = self.request_id.as_deref() else {
            return false;
        };
        self.respond(&ServerTunnelMessage::PromptResponse(PromptResponse::error(
            id, error,
        )))
    }

    pub fn respond_outcome(&self, outcome: Result<Value, TunnelError>) -> bool {
        match outcome {
            Ok(value) => self.respond_value(value),
            Err(e) => self.respond_error(e.to_string()),
        }
    }
}

#[derive(Clone, Default)]
pub struct TunnelServerOptions {
    pub on_prompt_request: Option<Arc<dyn PromptHandler>>,
}

/// Listening end of the local tunnel. Dropping it closes it.
pub struct TunnelServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    path: PathBuf,
    sink: Arc<dyn LoggerSink>,
    prompt_handler: Option<Arc<dyn PromptHandler>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    connections: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_conn_id: AtomicU64,
}

impl TunnelServer {
    /// Bind `path`, replacing a stale socket file left by an earlier process.
    pub async fn listen(
        path: impl AsRef<Path>,
        sink: Arc<dyn LoggerSink>,
        options: TunnelServerOptions,
    ) -> Result<Self, TunnelError> {
        let path = path.as_ref().to_path_buf();
        remove_socket_file(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| TunnelError::Connect {
            endpoint: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(ServerInner {
            path,
            sink,
            prompt_handler: options.on_prompt_request,
            closed: AtomicBool::new(false),
            shutdown,
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        });

        tracing::debug!(target: "nestlog.tunnel", path = %inner.path.display(), "tunnel server listening");
        tokio::spawn(accept_loop(inner.clone(), listener, shutdown_rx));

        Ok(Self { inner })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Push a `user_input` message to every connected child. Returns how many were reached.
    pub fn send_user_input(&self, content: &str) -> usize {
        let line = match encode_frame(&ServerTunnelMessage::UserInput {
            content: content.to_string(),
        }) {
            Ok(line) => line,
            Err(_) => return 0,
        };
        self.inner
            .connections
            .lock()
            .values()
            .filter(|tx| tx.send(line.clone()).is_ok())
            .count()
    }

    /// Stop accepting and unlink the socket path. Connections already accepted keep
    /// being served until their peer disconnects. Safe to call any number of times.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(true);
        if let Err(e) = remove_socket_file(&self.inner.path) {
            tracing::debug!(target: "nestlog.tunnel", error = %e, "failed to remove socket file");
        }
    }
}

impl Drop for TunnelServer {
    fn drop(&mut self) {
        self.close();
    }
}

fn remove_socket_file(path: &Path) -> Result<(), TunnelError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TunnelError::Connect {
            endpoint: path.display().to_string(),
            reason: format!("cannot remove stale socket: {e}"),
        }),
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: UnixListener,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let conn_id = inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(serve_connection(inner.clone(), conn_id, stream));
                }
                Err(e) => {
                    tracing::warn!(target: "nestlog.tunnel", error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            },
        }
    }
    tracing::debug!(target: "nestlog.tunnel", path = %inner.path.display(), "tunnel server stopped accepting");
}

async fn serve_connection(inner: Arc<ServerInner>, conn_id: u64, stream: UnixStream) {
    let (mut rd, mut wr) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    inner.connections.lock().insert(conn_id, tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if wr.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match rd.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(target: "nestlog.tunnel", conn_id, error = %e, "connection read failed");
                break;
            }
        };
        for message in decoder.decode::<TunnelMessage>(&buf[..n]) {
            inner.dispatch(&tx, message);
        }
    }

    inner.connections.lock().remove(&conn_id);
    writer.abort();
    tracing::debug!(target: "nestlog.tunnel", conn_id, "connection closed");
}

impl ServerInner {
    fn dispatch(&self, tx: &mpsc::UnboundedSender<String>, message: TunnelMessage) {
        let TunnelMessage::Structured { message } = message else {
            sink::dispatch(self.sink.as_ref(), message);
            return;
        };

        let is_prompt = message.is_prompt_request();
        if !is_prompt {
            self.sink.send_structured(message);
            return;
        }

        self.sink.send_structured(message.clone());
        match &self.prompt_handler {
            Some(handler) => {
                let responder = PromptResponder {
                    request_id: message.request_id().map(str::to_string),
                    tx: tx.clone(),
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler.handle_prompt(message, responder).await;
                });
            }
            None => {
                tracing::debug!(
                    target: "nestlog.tunnel",
                    request_id = message.request_id().unwrap_or("<none>"),
                    "prompt request received with no handler; it will only time out"
                );
            }
        }
    }
}

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const STEP: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh socket path inside a temp dir that lives as long as the returned guard.
pub fn temp_socket() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tunnel.sock");
    (dir, path)
}

/// Await `fut`, failing the test instead of hanging.
pub async fn within<F: Future>(what: &str, fut: F) -> F::Output {
    match tokio::time::timeout(STEP, fut).await {
        Ok(out) => out,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

/// Poll `cond` until it holds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    within(what, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// A `ws://` URL on which nothing is listening.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("ws://127.0.0.1:{port}/nestlog-agent")
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    Connected(u32),
    Frame(Value),
    Closed(u32),
}

/// Scripted remote viewer: records every frame the adapter sends and can answer back.
pub struct Viewer {
    pub url: String,
    listener: Option<TcpListener>,
    events: mpsc::UnboundedReceiver<ViewerEvent>,
    events_tx: mpsc::UnboundedSender<ViewerEvent>,
    outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
}

impl Viewer {
    /// Bind without accepting yet: clients connect at the TCP level but their
    /// handshake stalls until [`Viewer::serve`].
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            url: format!("ws://127.0.0.1:{port}/nestlog-agent"),
            listener: Some(listener),
            events,
            events_tx,
            outgoing: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start() -> Self {
        let mut viewer = Self::bind().await;
        viewer.serve();
        viewer
    }

    pub fn serve(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let events = self.events_tx.clone();
        let outgoing = self.outgoing.clone();
        tokio::spawn(async move {
            let mut conn_id = 0;
            while let Ok((stream, _)) = listener.accept().await {
                conn_id += 1;
                tokio::spawn(serve_conn(stream, conn_id, events.clone(), outgoing.clone()));
            }
        });
    }

    pub async fn next_event(&mut self) -> ViewerEvent {
        within("viewer event", self.events.recv())
            .await
            .expect("viewer event channel closed")
    }

    pub async fn expect_connected(&mut self) -> u32 {
        match self.next_event().await {
            ViewerEvent::Connected(id) => id,
            other => panic!("expected a connection, got {other:?}"),
        }
    }

    pub async fn expect_closed(&mut self) -> u32 {
        loop {
            match self.next_event().await {
                ViewerEvent::Closed(id) => return id,
                ViewerEvent::Frame(_) => continue,
                other => panic!("expected close, got {other:?}"),
            }
        }
    }

    pub async fn next_frame(&mut self) -> Value {
        loop {
            match self.next_event().await {
                ViewerEvent::Frame(v) => return v,
                ViewerEvent::Connected(_) => continue,
                ViewerEvent::Closed(id) => panic!("connection {id} closed while waiting for a frame"),
            }
        }
    }

    pub async fn frames(&mut self, n: usize) -> Vec<Value> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.next_frame().await);
        }
        out
    }

    /// Send a JSON message to the current connection.
    pub fn send(&self, value: Value) {
        if let Some(tx) = self.outgoing.lock().as_ref() {
            let _ = tx.send(Message::Text(value.to_string()));
        }
    }

    /// Close the current connection from the viewer side.
    pub fn kick(&self) {
        if let Some(tx) = self.outgoing.lock().take() {
            let _ = tx.send(Message::Close(None));
        }
    }
}

async fn serve_conn(
    stream: TcpStream,
    conn_id: u32,
    events: mpsc::UnboundedSender<ViewerEvent>,
    outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut tx, mut rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    *outgoing.lock() = Some(out_tx);
    let _ = events.send(ViewerEvent::Connected(conn_id));

    loop {
        tokio::select! {
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    let _ = events.send(ViewerEvent::Frame(value));
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            out = out_rx.recv() => match out {
                Some(Message::Close(frame)) => {
                    let _ = tx.send(Message::Close(frame)).await;
                    break;
                }
                Some(msg) => {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = events.send(ViewerEvent::Closed(conn_id));
}

pub fn output_seq(frame: &Value) -> u64 {
    assert_eq!(frame["type"], "output", "not an output frame: {frame}");
    frame["seq"].as_u64().unwrap()
}

pub fn frame_type(frame: &Value) -> &str {
    frame["type"].as_str().unwrap_or_default()
}

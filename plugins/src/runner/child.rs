use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use nestlog_core::api::{LoggerSink, TUNNEL_SOCKET_ENV};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Spawns one command wired to a tunnel socket and pumps its output into a sink.
pub struct ChildRunner {
    cmd: String,
    args: Vec<String>,
    envs: HashMap<String, String>,
    socket: Option<PathBuf>,
}

impl ChildRunner {
    pub fn new(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            envs: HashMap::new(),
            socket: None,
        }
    }

    /// Socket path exported to the child as `NESTLOG_TUNNEL_SOCKET`.
    pub fn tunnel_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket = Some(path.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Run to completion and return the exit code. A child killed by a signal
    /// reports `128 + signal`, as shells do.
    pub async fn run(&self, sink: Arc<dyn LoggerSink>) -> Result<i32> {
        let mut command = Command::new(&self.cmd);
        command
            .args(&self.args)
            .envs(&self.envs)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &self.socket {
            Some(path) => {
                command.env(TUNNEL_SOCKET_ENV, path);
            }
            None => {
                command.env_remove(TUNNEL_SOCKET_ENV);
            }
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.cmd))?;
        tracing::debug!(target: "nestlog.runner", cmd = %self.cmd, pid = child.id(), "child started");

        let mut pumps = Vec::new();
        if let Some(out) = child.stdout.take() {
            pumps.push(pump(out, sink.clone(), StreamKind::Stdout));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(pump(err, sink.clone(), StreamKind::Stderr));
        }

        let status = child.wait().await.context("failed to wait for child")?;
        for task in pumps {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!(target: "nestlog.runner", error = %e, "output pump failed"),
                Err(e) => tracing::debug!(target: "nestlog.runner", error = %e, "output pump panicked"),
            }
        }

        let code = exit_code(status);
        tracing::debug!(target: "nestlog.runner", cmd = %self.cmd, code, "child exited");
        Ok(code)
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

fn pump<R>(mut rd: R, sink: Arc<dyn LoggerSink>, kind: StreamKind) -> JoinHandle<std::io::Result<u64>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut carry = Utf8Carry::default();
        let mut total = 0u64;
        loop {
            let n = rd.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            let text = carry.push(&buf[..n]);
            if !text.is_empty() {
                emit(sink.as_ref(), kind, &text);
            }
        }
        let rest = carry.finish();
        if !rest.is_empty() {
            emit(sink.as_ref(), kind, &rest);
        }
        Ok(total)
    })
}

fn emit(sink: &dyn LoggerSink, kind: StreamKind, text: &str) {
    match kind {
        StreamKind::Stdout => sink.write_stdout(text),
        StreamKind::Stderr => sink.write_stderr(text),
    }
}

/// Holds back an incomplete UTF-8 sequence at the end of a chunk so a multi-byte
/// character split across reads is not mangled.
#[derive(Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // error_len() == None: the tail is a truncated sequence, keep it.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let head: Vec<u8> = self.pending.drain(..valid).collect();
        String::from_utf8_lossy(&head).into_owned()
    }

    fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

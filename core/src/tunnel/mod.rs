//! Local stream-socket tunnel between a parent process and the children it spawns.

mod client;
mod server;

pub(crate) use client::deliver_user_input;

use std::path::{Path, PathBuf};

pub use client::{TunnelClient, UserInputHandler};
pub use server::{PromptHandler, PromptResponder, TunnelServer, TunnelServerOptions};

/// Set by a parent on every child it spawns; names the parent's tunnel socket.
pub const TUNNEL_SOCKET_ENV: &str = "NESTLOG_TUNNEL_SOCKET";

/// The parent's tunnel socket path, if tunneling is active for this process.
pub fn socket_from_env() -> Option<String> {
    std::env::var(TUNNEL_SOCKET_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A fresh socket path for this process under `dir` (or the OS temp dir).
pub fn socket_path_in(dir: Option<&Path>) -> PathBuf {
    let dir = dir
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    dir.join(format!("nestlog-{}-{}.sock", std::process::id(), &suffix[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_paths_are_unique() {
        let dir = Path::new("/tmp");
        let a = socket_path_in(Some(dir));
        let b = socket_path_in(Some(dir));
        assert_ne!(a, b);
        assert!(a.starts_with(dir));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("sock"));
    }
}

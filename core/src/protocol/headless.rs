use serde::{Deserialize, Serialize};

use super::message::{ServerTunnelMessage, TunnelMessage};

/// Terminal the host process is attached to, when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<String>,
}

/// Metadata sent once at the start of every remote connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalInfo>,
}

impl SessionInfo {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Fill in the working directory and terminal pane from the process environment.
    pub fn detect_environment(mut self) -> Self {
        if self.workspace_path.is_none() {
            self.workspace_path = std::env::current_dir()
                .ok()
                .map(|p| p.to_string_lossy().to_string());
        }
        if self.terminal.is_none() {
            if let Ok(pane) = std::env::var("WEZTERM_PANE") {
                self.terminal = Some(TerminalInfo {
                    kind: "wezterm".to_string(),
                    pane_id: Some(pane),
                });
            } else if let Ok(pane) = std::env::var("TMUX_PANE") {
                self.terminal = Some(TerminalInfo {
                    kind: "tmux".to_string(),
                    pane_id: Some(pane),
                });
            }
        }
        self
    }
}

/// Adapter to remote viewer message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeadlessMessage {
    SessionInfo(SessionInfo),
    Output { seq: u64, message: TunnelMessage },
    ReplayStart,
    ReplayEnd,
}

/// Remote viewer to adapter messages share the local server-side vocabulary.
pub type HeadlessServerMessage = ServerTunnelMessage;

use std::sync::Arc;

use async_trait::async_trait;
use nestlog_core::api::{
    HeadlessAdapter, PromptHandler, PromptKind, PromptRequest, PromptResponder, StructuredMessage,
    TunnelError,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Where interactive questions are shown and answers read.
#[async_trait]
pub trait PromptTerminal: Send + Sync {
    fn show(&self, text: &str);
    /// `Ok(None)` at end of input.
    async fn read_line(&self) -> std::io::Result<Option<String>>;
}

/// Questions on stderr, answers from stdin.
pub struct StdioTerminal {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl StdioTerminal {
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    pub fn is_interactive() -> bool {
        atty::is(atty::Stream::Stdin)
    }
}

impl Default for StdioTerminal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptTerminal for StdioTerminal {
    fn show(&self, text: &str) {
        eprint!("{text}");
    }

    async fn read_line(&self) -> std::io::Result<Option<String>> {
        self.lines.lock().await.next_line().await
    }
}

/// Answers prompts at the local terminal, optionally racing the remote viewer.
///
/// With a headless adapter attached, whichever side answers first wins and the other
/// is abandoned. Without a terminal, only the remote side can answer.
pub struct InteractivePromptHandler {
    terminal: Option<Arc<dyn PromptTerminal>>,
    remote: Option<HeadlessAdapter>,
    // One question on the terminal at a time.
    turn: tokio::sync::Mutex<()>,
}

impl InteractivePromptHandler {
    pub fn new(terminal: Option<Arc<dyn PromptTerminal>>, remote: Option<HeadlessAdapter>) -> Self {
        Self {
            terminal,
            remote,
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Ask at the terminal until a valid answer or end of input.
    pub async fn ask_locally(
        &self,
        terminal: &dyn PromptTerminal,
        request: &PromptRequest,
    ) -> Result<Value, String> {
        let _turn = self.turn.lock().await;
        loop {
            terminal.show(&render_question(request));
            let line = match terminal.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err("input closed before an answer was given".to_string()),
                Err(e) => return Err(format!("failed to read answer: {e}")),
            };
            match parse_answer(request, &line) {
                Ok(value) => return Ok(value),
                Err(hint) => terminal.show(&format!("  {hint}\n")),
            }
        }
    }

    async fn answer(&self, request: &PromptRequest) -> Result<Value, String> {
        let remote_wait = self
            .remote
            .as_ref()
            .and_then(|adapter| adapter.wait_for_prompt_response(&request.request_id).ok());

        match (remote_wait, self.terminal.as_deref()) {
            (None, None) => Err("no interactive terminal available".to_string()),
            (None, Some(terminal)) => self.ask_locally(terminal, request).await,
            (Some(wait), None) => wait.result().await.map_err(|e| e.to_string()),
            (Some(wait), Some(terminal)) => {
                let cancel = wait.canceller();
                let local = self.ask_locally(terminal, request);
                tokio::pin!(local);
                tokio::select! {
                    remote = wait.result() => match remote {
                        Ok(value) => {
                            terminal.show("  (answered remotely)\n");
                            Ok(value)
                        }
                        // Remote side went away; the terminal still can answer.
                        Err(TunnelError::Destroyed) | Err(TunnelError::Cancelled(_)) => local.await,
                        Err(e) => Err(e.to_string()),
                    },
                    answer = &mut local => {
                        cancel.cancel();
                        answer
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PromptHandler for InteractivePromptHandler {
    async fn handle_prompt(&self, request: StructuredMessage, responder: PromptResponder) {
        let Some(request) = PromptRequest::from_structured(&request) else {
            tracing::warn!(
                target: "nestlog.prompt",
                request_id = request.request_id().unwrap_or("<none>"),
                "unreadable prompt request"
            );
            responder.respond_error("unreadable prompt request");
            return;
        };

        // Dropping the answer future releases the remote wait and the terminal turn.
        let outcome = tokio::select! {
            outcome = self.answer(&request) => outcome,
            _ = responder.closed() => {
                tracing::debug!(
                    target: "nestlog.prompt",
                    request_id = %request.request_id,
                    "requester went away; abandoning prompt"
                );
                return;
            }
        };
        let delivered = match outcome {
            Ok(value) => responder.respond_value(value),
            Err(message) => responder.respond_error(message),
        };
        if !delivered {
            tracing::debug!(
                target: "nestlog.prompt",
                request_id = %request.request_id,
                "prompt answered after its requester went away"
            );
        }
    }
}

pub fn render_question(request: &PromptRequest) -> String {
    let cfg = &request.prompt_config;
    let mut text = format!("? {}", cfg.message);
    match request.prompt_type {
        PromptKind::Input => {
            if let Some(default) = cfg.default.as_ref() {
                text.push_str(&format!(" ({})", display_value(default)));
            }
        }
        PromptKind::Confirm => {
            let yes = cfg.default.as_ref().and_then(Value::as_bool).unwrap_or(false);
            text.push_str(if yes { " (Y/n)" } else { " (y/N)" });
        }
        PromptKind::Select | PromptKind::Checkbox => {
            for (i, choice) in cfg.choices.iter().enumerate() {
                text.push_str(&format!("\n  {}) {}", i + 1, choice.name));
            }
            if request.prompt_type == PromptKind::Checkbox {
                text.push_str("\n  (comma separated, empty for none)");
            }
        }
    }
    text.push_str("\n> ");
    text
}

/// Turn a typed line into the JSON value the requester expects.
/// `Err` carries a hint to show before asking again.
pub fn parse_answer(request: &PromptRequest, line: &str) -> Result<Value, String> {
    let cfg = &request.prompt_config;
    let line = line.trim();
    match request.prompt_type {
        PromptKind::Input => {
            if line.is_empty() {
                if let Some(default) = cfg.default.clone() {
                    return Ok(default);
                }
            }
            Ok(Value::String(line.to_string()))
        }
        PromptKind::Confirm => match line.to_ascii_lowercase().as_str() {
            "" => Ok(Value::Bool(
                cfg.default.as_ref().and_then(Value::as_bool).unwrap_or(false),
            )),
            "y" | "yes" => Ok(Value::Bool(true)),
            "n" | "no" => Ok(Value::Bool(false)),
            _ => Err("please answer y or n".to_string()),
        },
        PromptKind::Select => {
            if line.is_empty() {
                if let Some(default) = cfg.default.clone() {
                    return Ok(default);
                }
            }
            pick_choice(request, line)
        }
        PromptKind::Checkbox => {
            if line.is_empty() {
                return Ok(cfg.default.clone().unwrap_or(Value::Array(Vec::new())));
            }
            line.split(',')
                .map(|part| pick_choice(request, part.trim()))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
    }
}

fn pick_choice(request: &PromptRequest, token: &str) -> Result<Value, String> {
    let choices = &request.prompt_config.choices;
    if let Ok(n) = token.parse::<usize>() {
        if (1..=choices.len()).contains(&n) {
            return Ok(choices[n - 1].value.clone());
        }
    }
    choices
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(token))
        .map(|c| c.value.clone())
        .ok_or_else(|| format!("pick 1-{} or a listed name", choices.len()))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

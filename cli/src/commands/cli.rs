use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use nestlog_core::api::PromptKind;

#[derive(Parser, Debug)]
#[command(name = "nestlog", version, about = "Nested process logging and prompt tunnel")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Host a tunnel for CMD, run it, and exit with its code.
    Run(RunArgs),
    /// Listen on a tunnel socket until Ctrl-C, printing and answering locally.
    Serve(ServeArgs),
    /// Send one message through the parent's tunnel.
    Emit(EmitArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Socket path to host; defaults to a fresh path under `[tunnel].socket_dir`.
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Mirror output to this remote viewer (ws:// or wss://).
    #[arg(long, conflicts_with = "no_headless")]
    pub headless_url: Option<String>,

    /// Do not connect to a remote viewer even if the config enables one.
    #[arg(long)]
    pub no_headless: bool,

    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "CMD")]
    pub command: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long)]
    pub socket: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EmitArgs {
    /// Tunnel socket; defaults to `NESTLOG_TUNNEL_SOCKET`.
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub message: EmitMessage,
}

#[derive(Subcommand, Debug, Clone)]
pub enum EmitMessage {
    Log(EmitText),
    Error(EmitText),
    Warn(EmitText),
    Debug(EmitText),
    Stdout(EmitText),
    Stderr(EmitText),
    /// Ask a question and print the answer as JSON.
    Prompt(EmitPromptArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EmitText {
    #[arg(required = true, allow_hyphen_values = true)]
    pub text: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKindArg {
    Input,
    Confirm,
    Select,
    Checkbox,
}

impl From<PromptKindArg> for PromptKind {
    fn from(kind: PromptKindArg) -> Self {
        match kind {
            PromptKindArg::Input => PromptKind::Input,
            PromptKindArg::Confirm => PromptKind::Confirm,
            PromptKindArg::Select => PromptKind::Select,
            PromptKindArg::Checkbox => PromptKind::Checkbox,
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EmitPromptArgs {
    #[arg(long)]
    pub message: String,

    #[arg(long, value_enum, default_value_t = PromptKindArg::Input)]
    pub kind: PromptKindArg,

    /// Choice for select/checkbox prompts. Can be specified multiple times.
    #[arg(long = "choice", action = clap::ArgAction::Append)]
    pub choices: Vec<String>,

    /// Default answer; parsed as JSON when it is valid JSON, otherwise taken as a string.
    #[arg(long)]
    pub default: Option<String>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn run_keeps_child_flags_verbatim() {
        let args = Args::try_parse_from([
            "nestlog", "run", "--no-headless", "--", "sh", "-c", "echo --socket",
        ])
        .unwrap();
        let Commands::Run(run) = args.command else {
            panic!("expected run");
        };
        assert!(run.no_headless);
        assert_eq!(run.socket, None);
        assert_eq!(run.command, vec!["sh", "-c", "echo --socket"]);
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Args::try_parse_from(["nestlog", "run"]).is_err());
    }

    #[test]
    fn headless_flags_conflict() {
        let res = Args::try_parse_from([
            "nestlog",
            "run",
            "--headless-url",
            "ws://localhost:1/x",
            "--no-headless",
            "--",
            "true",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn emit_prompt_collects_choices() {
        let args = Args::try_parse_from([
            "nestlog", "emit", "prompt", "--message", "Pick", "--kind", "select", "--choice", "a",
            "--choice", "b", "--timeout-ms", "250", "--socket", "/tmp/t.sock",
        ])
        .unwrap();
        let Commands::Emit(emit) = args.command else {
            panic!("expected emit");
        };
        assert_eq!(emit.socket, Some(PathBuf::from("/tmp/t.sock")));
        let EmitMessage::Prompt(prompt) = emit.message else {
            panic!("expected prompt");
        };
        assert_eq!(prompt.kind, PromptKindArg::Select);
        assert_eq!(prompt.choices, vec!["a", "b"]);
        assert_eq!(prompt.timeout_ms, Some(250));
    }

    #[test]
    fn emit_text_joins_words() {
        let args = Args::try_parse_from(["nestlog", "emit", "warn", "disk", "almost", "full"]).unwrap();
        let Commands::Emit(emit) = args.command else {
            panic!("expected emit");
        };
        let EmitMessage::Warn(text) = emit.message else {
            panic!("expected warn");
        };
        assert_eq!(text.text, vec!["disk", "almost", "full"]);
    }
}

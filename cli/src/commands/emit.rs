use std::sync::Arc;
use std::time::Duration;

use nestlog_core::api::{
    AppConfig, CliError, Logger, LoggerSink, PromptKind, PromptRequest, TunnelClient,
};
use nestlog_plugins::factory::build_console_sink;
use nestlog_plugins::prompt::{InteractivePromptHandler, StdioTerminal};
use serde_json::Value;

use super::cli::{EmitArgs, EmitMessage, EmitPromptArgs};

/// Child-side: say one thing through the parent's tunnel, or to the console when there is none.
pub async fn emit(args: EmitArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let console = build_console_sink(cfg);
    let (logger, client) = match args.socket.as_ref() {
        // An explicit socket must be reachable.
        Some(path) => {
            let client = TunnelClient::connect(path).await?;
            (Logger::new(Arc::new(client.clone())), Some(client))
        }
        None => Logger::from_env(console).await,
    };

    let outcome = match args.message {
        EmitMessage::Prompt(prompt) => ask(build_request(&prompt), client.as_ref()).await,
        other => {
            send_text(logger.sink().as_ref(), other);
            Ok(0)
        }
    };

    if let Some(client) = client.as_ref() {
        client
            .destroy(Duration::from_millis(cfg.tunnel.destroy_timeout_ms))
            .await;
    }
    outcome
}

fn send_text(sink: &dyn LoggerSink, message: EmitMessage) {
    match message {
        EmitMessage::Log(t) => sink.log(&t.text),
        EmitMessage::Error(t) => sink.error(&t.text),
        EmitMessage::Warn(t) => sink.warn(&t.text),
        EmitMessage::Debug(t) => sink.debug(&t.text),
        EmitMessage::Stdout(t) => sink.write_stdout(&with_newline(t.text.join(" "))),
        EmitMessage::Stderr(t) => sink.write_stderr(&with_newline(t.text.join(" "))),
        EmitMessage::Prompt(_) => {}
    }
}

fn with_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

pub fn build_request(args: &EmitPromptArgs) -> PromptRequest {
    let mut request = PromptRequest::new(PromptKind::from(args.kind), args.message.clone());
    for choice in &args.choices {
        request = request.with_choice(choice.clone(), Value::String(choice.clone()));
    }
    if let Some(default) = args.default.as_deref() {
        let value = serde_json::from_str(default).unwrap_or_else(|_| Value::String(default.to_string()));
        request = request.with_default(value);
    }
    if let Some(ms) = args.timeout_ms {
        request = request.with_timeout_ms(ms);
    }
    request
}

async fn ask(request: PromptRequest, client: Option<&TunnelClient>) -> Result<i32, CliError> {
    let value = match client {
        Some(client) => client.prompt(request).await?,
        None => {
            if !StdioTerminal::is_interactive() {
                return Err(CliError::Command(
                    "no tunnel to forward the prompt to and stdin is not a terminal".to_string(),
                ));
            }
            let terminal = StdioTerminal::new();
            InteractivePromptHandler::new(None, None)
                .ask_locally(&terminal, &request)
                .await
                .map_err(CliError::Command)?
        }
    };
    println!("{}", serde_json::to_string(&value).map_err(anyhow::Error::from)?);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::cli::PromptKindArg;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn prompt_args(default: Option<&str>) -> EmitPromptArgs {
        EmitPromptArgs {
            message: "Deploy?".to_string(),
            kind: PromptKindArg::Select,
            choices: vec!["yes".to_string(), "no".to_string()],
            default: default.map(str::to_string),
            timeout_ms: Some(1500),
        }
    }

    #[test]
    fn request_carries_choices_and_timeout() {
        let request = build_request(&prompt_args(None));
        assert_eq!(request.prompt_type, PromptKind::Select);
        assert_eq!(request.prompt_config.message, "Deploy?");
        let names: Vec<_> = request.prompt_config.choices.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["yes", "no"]);
        assert_eq!(request.timeout_ms, Some(1500));
        assert_eq!(request.prompt_config.default, None);
    }

    #[test]
    fn default_is_json_when_it_parses() {
        assert_eq!(build_request(&prompt_args(Some("true"))).prompt_config.default, Some(json!(true)));
        assert_eq!(
            build_request(&prompt_args(Some("not json"))).prompt_config.default,
            Some(json!("not json"))
        );
    }

    #[test]
    fn stdout_text_ends_with_newline() {
        assert_eq!(with_newline("a b".to_string()), "a b\n");
        assert_eq!(with_newline("done\n".to_string()), "done\n");
    }
}

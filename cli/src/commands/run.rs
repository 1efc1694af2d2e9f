use std::sync::Arc;

use nestlog_core::api::{
    resolve_socket_dir, socket_path_in, AppConfig, CliError, ConfigError, SessionInfo,
    TunnelServer, TunnelServerOptions, UserInputHandler,
};
use nestlog_plugins::factory::{build_host_stack, HostStack, HostStackOptions};
use nestlog_plugins::runner::ChildRunner;

use super::cli::RunArgs;

/// Host a tunnel for the child, run it, tear down, and hand back its exit code.
#[tracing::instrument(name = "cli.run", skip_all)]
pub async fn run(args: RunArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let Some((program, rest)) = args.command.split_first() else {
        return Err(CliError::Command("no command given".to_string()));
    };
    if let Some(url) = args.headless_url.as_deref() {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                field: "--headless-url",
                value: url.to_string(),
            }
            .into());
        }
    }

    let socket = match args.socket.clone() {
        Some(path) => path,
        None => socket_path_in(resolve_socket_dir(cfg).as_deref()),
    };
    if let Some(dir) = socket.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let session = SessionInfo::new(args.command.join(" ")).detect_environment();
    let opts = HostStackOptions {
        headless_url: args.headless_url.clone(),
        no_headless: args.no_headless,
    };
    let stack = build_host_stack(cfg, &opts, session).await?;

    let server = match TunnelServer::listen(
        &socket,
        stack.sink(),
        TunnelServerOptions {
            on_prompt_request: Some(stack.prompt_handler.clone()),
        },
    )
    .await
    {
        Ok(server) => Arc::new(server),
        Err(e) => {
            stack.shutdown(cfg).await;
            return Err(e.into());
        }
    };
    route_user_input(&stack, &server);

    let outcome = ChildRunner::new(program.clone(), rest.to_vec())
        .tunnel_socket(server.path())
        .run(stack.sink())
        .await;

    server.close();
    clear_user_input(&stack);
    stack.shutdown(cfg).await;

    let code = outcome.map_err(|e| CliError::Command(format!("{e:#}")))?;
    tracing::debug!(target: "nestlog.runner", code, "run finished");
    Ok(code)
}

/// Pass `user_input` arriving from above (parent tunnel or viewer) down to our children.
fn route_user_input(stack: &HostStack, server: &Arc<TunnelServer>) {
    let weak = Arc::downgrade(server);
    let handler: UserInputHandler = Arc::new(move |content: String| -> anyhow::Result<()> {
        if let Some(server) = weak.upgrade() {
            let reached = server.send_user_input(&content);
            tracing::trace!(target: "nestlog.tunnel", reached, "relayed user input");
        }
        Ok(())
    });
    if let Some(adapter) = stack.headless.as_ref() {
        adapter.set_user_input_handler(Some(handler.clone()));
    }
    if let Some(client) = stack.upstream.as_ref() {
        client.set_user_input_handler(Some(handler));
    }
}

fn clear_user_input(stack: &HostStack) {
    if let Some(adapter) = stack.headless.as_ref() {
        adapter.set_user_input_handler(None);
    }
    if let Some(client) = stack.upstream.as_ref() {
        client.set_user_input_handler(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run_args(socket: std::path::PathBuf, script: &str) -> RunArgs {
        RunArgs {
            socket: Some(socket),
            headless_url: None,
            no_headless: true,
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn propagates_child_exit_code_and_unlinks_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("run.sock");
        let code = run(run_args(socket.clone(), "exit 7"), &AppConfig::default())
            .await
            .unwrap();
        assert_eq!(code, 7);
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn child_sees_live_tunnel_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nested").join("run.sock");
        let script = format!("test -S \"$NESTLOG_TUNNEL_SOCKET\" && [ \"$NESTLOG_TUNNEL_SOCKET\" = '{}' ]", socket.display());
        let code = run(run_args(socket, &script), &AppConfig::default())
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn rejects_non_websocket_viewer_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = run_args(dir.path().join("run.sock"), "true");
        args.no_headless = false;
        args.headless_url = Some("http://localhost:8123".to_string());
        let err = run(args, &AppConfig::default()).await.unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}

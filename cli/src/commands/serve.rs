use std::sync::Arc;

use nestlog_core::api::{AppConfig, CliError, PromptHandler, TunnelServer, TunnelServerOptions};
use nestlog_plugins::factory::{build_console_sink, build_prompt_handler};

use super::cli::ServeArgs;

/// Standalone tunnel endpoint: print whatever children send and answer their prompts here.
pub async fn serve(args: ServeArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let sink = build_console_sink(cfg);
    let handler: Arc<dyn PromptHandler> = build_prompt_handler(cfg, None, None);
    let server = TunnelServer::listen(
        &args.socket,
        sink,
        TunnelServerOptions {
            on_prompt_request: Some(handler),
        },
    )
    .await?;

    eprintln!("listening on {}", server.path().display());
    eprintln!("export NESTLOG_TUNNEL_SOCKET={}", server.path().display());

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        target: "nestlog.tunnel",
        connections = server.connection_count(),
        "interrupted, closing tunnel"
    );
    server.close();
    Ok(0)
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use nestlog_core::api::{
    AppConfig, HeadlessAdapter, HeadlessOptions, Logger, LoggerSink, PromptHandler, SessionInfo,
    TunnelClient,
};

use crate::prompt::{ForwardingPromptHandler, InteractivePromptHandler, PromptTerminal, StdioTerminal};
use crate::sink::{ConsoleSink, TracingSink};

pub fn build_console_sink(cfg: &AppConfig) -> Arc<dyn LoggerSink> {
    Arc::new(ConsoleSink::new(cfg.logging.verbose))
}

pub fn build_tracing_sink() -> Arc<dyn LoggerSink> {
    Arc::new(TracingSink)
}

/// Wrap `local` in a headless adapter when the config enables one.
pub fn build_headless(
    cfg: &AppConfig,
    local: Arc<dyn LoggerSink>,
    session: SessionInfo,
) -> Result<Option<HeadlessAdapter>> {
    if !cfg.headless.enabled {
        return Ok(None);
    }
    let adapter = HeadlessAdapter::new(
        cfg.headless.url.clone(),
        session,
        local,
        HeadlessOptions::from(&cfg.headless),
    )?;
    Ok(Some(adapter))
}

/// Forward up the tree when there is a parent, otherwise ask here.
pub fn build_prompt_handler(
    cfg: &AppConfig,
    upstream: Option<TunnelClient>,
    remote: Option<HeadlessAdapter>,
) -> Arc<dyn PromptHandler> {
    if let Some(upstream) = upstream {
        let fallback = cfg.tunnel.prompt_timeout_ms.map(Duration::from_millis);
        return Arc::new(ForwardingPromptHandler::new(upstream, fallback));
    }
    let terminal: Option<Arc<dyn PromptTerminal>> = if StdioTerminal::is_interactive() {
        Some(Arc::new(StdioTerminal::new()))
    } else {
        None
    };
    Arc::new(InteractivePromptHandler::new(terminal, remote))
}

/// Everything a hosting process writes through, plus the transports it must shut down.
pub struct HostStack {
    pub logger: Logger,
    pub upstream: Option<TunnelClient>,
    pub headless: Option<HeadlessAdapter>,
    pub prompt_handler: Arc<dyn PromptHandler>,
}

#[derive(Debug, Clone, Default)]
pub struct HostStackOptions {
    /// Overrides `[headless].url` and turns the adapter on.
    pub headless_url: Option<String>,
    pub no_headless: bool,
}

/// Build the sink stack for a hosting process:
/// parent tunnel if there is one, else console optionally mirrored to a remote viewer.
pub async fn build_host_stack(
    cfg: &AppConfig,
    opts: &HostStackOptions,
    session: SessionInfo,
) -> Result<HostStack> {
    let mut cfg = cfg.clone();
    if let Some(url) = opts.headless_url.as_ref() {
        cfg.headless.url = url.clone();
        cfg.headless.enabled = true;
    }
    if opts.no_headless {
        cfg.headless.enabled = false;
    }

    let console = build_console_sink(&cfg);
    let (logger, upstream) = Logger::from_env(console.clone()).await;

    // Only the root of a process tree talks to the viewer.
    let headless = if upstream.is_none() {
        build_headless(&cfg, console, session)?
    } else {
        None
    };
    let logger = match headless.as_ref() {
        Some(adapter) => Logger::new(Arc::new(adapter.clone())),
        None => logger,
    };
    let prompt_handler = build_prompt_handler(&cfg, upstream.clone(), headless.clone());

    Ok(HostStack {
        logger,
        upstream,
        headless,
        prompt_handler,
    })
}

impl HostStack {
    pub fn sink(&self) -> Arc<dyn LoggerSink> {
        self.logger.sink()
    }

    /// Flush and release the transports, viewer first so it sees the last output.
    pub async fn shutdown(&self, cfg: &AppConfig) {
        if let Some(adapter) = self.headless.as_ref() {
            adapter
                .destroy(Duration::from_millis(cfg.headless.destroy_timeout_ms))
                .await;
        }
        if let Some(client) = self.upstream.as_ref() {
            client
                .destroy(Duration::from_millis(cfg.tunnel.destroy_timeout_ms))
                .await;
        }
    }
}

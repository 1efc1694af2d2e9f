//! CLI assembly: tracing setup, command dispatch and exit-code mapping.
use nestlog_core::api::{AppConfig, CliError, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::commands::{cli, emit, run, serve};

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

pub async fn dispatch(cmd: cli::Commands, cfg: &AppConfig) -> Result<i32, CliError> {
    match cmd {
        cli::Commands::Run(args) => run::run(args, cfg).await,
        cli::Commands::Serve(args) => serve::serve(args, cfg).await,
        cli::Commands::Emit(args) => emit::emit(args, cfg).await,
    }
}

pub fn exit_code_for_error(e: &CliError) -> i32 {
    // 0: success
    // 11: config error
    // 20: transport / IO error, including a child that could not be started
    // 50: internal/uncategorized
    match e {
        CliError::Config(_) => 11,
        CliError::Tunnel(_) => 20,
        CliError::Io(_) => 20,
        CliError::Command(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}

/// Filter for the CLI's subscriber. A non-empty `RUST_LOG` replaces the configured level.
///
/// The websocket stack is noisy at debug, so it stays at `warn` unless the level names it.
pub fn build_filter(logging: &LoggingConfig, rust_log: Option<&str>) -> Result<EnvFilter, String> {
    if let Some(env) = rust_log.map(str::trim).filter(|v| !v.is_empty()) {
        return EnvFilter::try_new(env).map_err(|e| format!("invalid RUST_LOG: {e}"));
    }

    let level = logging.level.trim();
    let mut directives = vec![if level.is_empty() { "info" } else { level }.to_string()];
    for noisy in ["tungstenite", "tokio_tungstenite"] {
        if !level.contains(noisy) {
            directives.push(format!("{noisy}=warn"));
        }
    }
    if logging.verbose && !level.contains("nestlog") {
        directives.push("nestlog=debug".to_string());
    }
    EnvFilter::try_new(directives.join(",")).map_err(|e| format!("invalid [logging].level: {e}"))
}

fn log_dir(logging: &LoggingConfig) -> std::path::PathBuf {
    match logging
        .directory
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(d) => std::path::PathBuf::from(shellexpand::tilde(d).as_ref()),
        None => std::env::temp_dir().join("nestlog"),
    }
}

pub fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }
    if !logging.console && !logging.file {
        return Err("logging enabled but neither console nor file output is on".to_string());
    }

    let filter = build_filter(logging, std::env::var("RUST_LOG").ok().as_deref())?;

    let file_writer = if logging.file {
        let dir = log_dir(logging);
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("cannot create log dir {}: {e}", dir.display()))?;
        // One file per process: host and nested children log side by side.
        let file_name = format!("nestlog.{}.log", std::process::id());
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
        let _ = LOG_GUARD.set(guard);
        Some(writer)
    } else {
        None
    };

    // Children share the host's stderr, so console lines stay compact.
    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .without_time()
    });
    let file_layer = file_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
            .with_thread_ids(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestlog_core::api::{ConfigError, TunnelError};

    #[test]
    fn exit_codes_follow_error_category() {
        let config = CliError::Config(ConfigError::NoHome);
        assert_eq!(exit_code_for_error(&config), 11);

        let tunnel = CliError::Tunnel(TunnelError::ConnectionLost);
        assert_eq!(exit_code_for_error(&tunnel), 20);

        let io = CliError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(exit_code_for_error(&io), 20);

        let internal = CliError::Anyhow(anyhow::anyhow!("unexpected"));
        assert_eq!(exit_code_for_error(&internal), 50);
    }

    #[test]
    fn disabled_logging_is_a_no_op() {
        let logging = LoggingConfig {
            enabled: false,
            ..LoggingConfig::default()
        };
        assert!(init_tracing(&logging).is_ok());
    }

    fn filter_string(logging: &LoggingConfig, rust_log: Option<&str>) -> String {
        build_filter(logging, rust_log).unwrap().to_string()
    }

    #[test]
    fn configured_level_quiets_websocket_crates() {
        let logging = LoggingConfig {
            level: "info".to_string(),
            ..LoggingConfig::default()
        };
        let filter = filter_string(&logging, None);
        assert!(filter.contains("tungstenite=warn"), "{filter}");
        assert!(filter.contains("tokio_tungstenite=warn"), "{filter}");
        assert!(!filter.contains("nestlog=debug"), "{filter}");
    }

    #[test]
    fn verbose_raises_nestlog_targets() {
        let logging = LoggingConfig {
            level: "warn".to_string(),
            verbose: true,
            ..LoggingConfig::default()
        };
        assert!(filter_string(&logging, None).contains("nestlog=debug"));

        let explicit = LoggingConfig {
            level: "warn,nestlog.tunnel=trace".to_string(),
            verbose: true,
            ..LoggingConfig::default()
        };
        assert!(!filter_string(&explicit, None).contains("nestlog=debug"));
    }

    #[test]
    fn rust_log_overrides_config() {
        let logging = LoggingConfig {
            level: "info".to_string(),
            verbose: true,
            ..LoggingConfig::default()
        };
        let filter = filter_string(&logging, Some("nestlog.headless=trace"));
        assert!(filter.contains("nestlog.headless=trace"), "{filter}");
        assert!(!filter.contains("tungstenite"), "{filter}");

        // Blank RUST_LOG falls back to the configured level.
        assert!(filter_string(&logging, Some("  ")).contains("nestlog=debug"));
    }

    #[test]
    fn invalid_level_is_reported() {
        let logging = LoggingConfig {
            level: "nestlog=loud".to_string(),
            ..LoggingConfig::default()
        };
        let err = build_filter(&logging, None).unwrap_err();
        assert!(err.contains("[logging].level"), "{err}");
    }

    #[test]
    fn log_dir_expands_home_and_defaults_to_temp() {
        let logging = LoggingConfig::default();
        assert_eq!(log_dir(&logging), std::env::temp_dir().join("nestlog"));

        let custom = LoggingConfig {
            directory: Some("  /var/log/nestlog ".to_string()),
            ..LoggingConfig::default()
        };
        assert_eq!(log_dir(&custom), std::path::PathBuf::from("/var/log/nestlog"));
    }
}

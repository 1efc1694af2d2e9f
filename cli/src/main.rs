use clap::Parser;
use nestlog_cli::app;
use nestlog_cli::commands::cli;
use nestlog_core::api::{load_default, CliError};

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            app::exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg = load_default()?;
    app::init_tracing(&cfg.logging).map_err(CliError::Command)?;

    app::dispatch(args.command, &cfg).await
}

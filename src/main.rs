//! Main entry point for the vaimm CLI

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use vaimm::cancel::{CancelReason, RunCancellation};
use vaimm::cli::{list, Cli, Commands};

/// Initialize tracing on stderr, optionally as JSON (`LOG_FORMAT=json`)
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vaimm=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let cancel = RunCancellation::shared();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - stopping downloads");
                cancel.cancel(CancelReason::Interrupted);
            }
        }
    });

    let result = match cli.command {
        Commands::ListBackends => list::list_backends(&cli).map(|_| 0),
        Commands::ListModels(ref args) => args.execute(&cli).map(|_| 0),
        Commands::ListFiles(ref args) => args.execute(&cli).map(|_| 0),
        Commands::Download(ref args) => args
            .execute(&cli, cancel.clone())
            .await
            .map(|result| result.exit_code()),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let code = e.exit_code();
            let report = anyhow::Error::new(e);
            error!("Command failed: {report:#}");
            eprintln!("Error: {report:#}");
            std::process::exit(code);
        }
    }
}

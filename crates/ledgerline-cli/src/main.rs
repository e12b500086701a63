//! Ledgerline operator CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use ledgerline_cli::cli::Cli;
use ledgerline_cli::{commands, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.config.log_format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ledgerline");

    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "command failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

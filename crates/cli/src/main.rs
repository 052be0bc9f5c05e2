//! netgauge CLI entry point.

use clap::Parser;
use colored::Colorize;
use netgauge_cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    netgauge_cli::init_tracing(cli.verbose);

    match netgauge_cli::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

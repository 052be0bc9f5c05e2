//! CLI for netgauge.
//!
//! This crate is the presentation layer: it starts and cancels runs,
//! renders live progress from the engine's state channel and prints the
//! history log.

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use netgauge_core::units::{format_latency, format_speed};
use netgauge_core::{EngineConfig, ResultRecord, RunState, RunStatus, Stage};
use netgauge_engine::Orchestrator;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// netgauge CLI.
#[derive(Parser, Debug)]
#[command(name = "netgauge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file; a missing file falls back to defaults.
    #[arg(short, long, global = true, env = "NETGAUGE_CONFIG", default_value = "netgauge.toml")]
    pub config: PathBuf,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Measure latency, download and upload, then record the result.
    ///
    /// Ctrl-C aborts the run; the partial result is still recorded.
    Run {
        /// Print the result record as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show previous results, most recent first.
    History {
        /// Maximum number of results.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = HistoryFormat::Table)]
        format: HistoryFormat,
    },

    /// Show version, configuration and history status.
    Status {
        /// Show the effective configuration.
        #[arg(short, long)]
        detailed: bool,
    },
}

/// Output format of the `history` command.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFormat {
    /// Aligned plain-text table.
    Table,
    /// JSON array of result records.
    Json,
    /// Markdown table.
    Markdown,
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default level.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

/// Run the CLI command.
///
/// # Returns
///
/// The process exit code: failure when a run ended in a stage error.
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = EngineConfig::load(Some(cli.config.as_path()))
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run { json } => run_test(config, json).await,
        Commands::History { limit, format } => show_history(&config, limit, format),
        Commands::Status { detailed } => show_status(&config, &cli.config, detailed),
    }
}

async fn run_test(config: EngineConfig, json: bool) -> anyhow::Result<ExitCode> {
    let history = Arc::new(netgauge_history::open(&config.history));
    let orchestrator = Arc::new(Orchestrator::with_http(config, history)?);

    let bar = (!json).then(progress_bar);
    let watcher = bar.clone().map(|bar| {
        let mut state = orchestrator.subscribe();
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let snapshot = state.borrow_and_update().clone();
                bar.set_position(snapshot.progress.round() as u64);
                bar.set_message(live_line(&snapshot));
            }
        })
    });

    let interrupt = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel();
            }
        }
    });

    let record = orchestrator.start().await?;
    interrupt.abort();
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }

    Ok(match record.status {
        RunStatus::Error(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    bar
}

/// Progress bar message for a state snapshot.
pub fn live_line(state: &RunState) -> String {
    match (state.stage, state.live_mbps) {
        (Stage::Download | Stage::Upload, Some(mbps)) => {
            format!("{} {}", state.stage.label(), format_speed(mbps))
        }
        (stage, _) => stage.label().to_string(),
    }
}

fn metric_or_unavailable(value: Option<f64>, format: fn(f64) -> String) -> String {
    value.map(format).unwrap_or_else(|| "unavailable".to_string())
}

fn print_record(record: &ResultRecord) {
    let status = match &record.status {
        RunStatus::Completed => record.status.to_string().green().bold(),
        RunStatus::Aborted => record.status.to_string().yellow().bold(),
        _ => record.status.to_string().red().bold(),
    };

    println!("{}", "Speed test result".bold());
    println!("  {:<10} {}", "Time", record.display_timestamp());
    println!("  {:<10} {}", "Client", record.client_address);
    println!(
        "  {:<10} {}",
        "Latency",
        metric_or_unavailable(record.latency_ms, format_latency).cyan()
    );
    println!(
        "  {:<10} {}",
        "Download",
        metric_or_unavailable(record.download_mbps, format_speed).cyan()
    );
    println!(
        "  {:<10} {}",
        "Upload",
        metric_or_unavailable(record.upload_mbps, format_speed).cyan()
    );
    println!("  {:<10} {}", "Status", status);
}

/// One aligned table row.
pub fn table_row(record: &ResultRecord) -> String {
    format!(
        "{:<20} {:>12} {:>12} {:>12}  {:<16} {}",
        record.display_timestamp(),
        metric_or_unavailable(record.latency_ms, format_latency),
        metric_or_unavailable(record.download_mbps, format_speed),
        metric_or_unavailable(record.upload_mbps, format_speed),
        record.client_address.to_string(),
        record.status
    )
}

fn show_history(
    config: &EngineConfig,
    limit: usize,
    format: HistoryFormat,
) -> anyhow::Result<ExitCode> {
    let log = netgauge_history::open(&config.history);
    let records = log.snapshot();
    let shown = &records[..limit.min(records.len())];

    match format {
        HistoryFormat::Json => println!("{}", serde_json::to_string_pretty(shown)?),
        HistoryFormat::Markdown => print!(
            "{}",
            netgauge_history::markdown::generate_summary(&records, limit)
        ),
        HistoryFormat::Table => {
            if shown.is_empty() {
                println!("No results recorded yet ({})", log.location());
                return Ok(ExitCode::SUCCESS);
            }
            println!(
                "{}",
                format!(
                    "{:<20} {:>12} {:>12} {:>12}  {:<16} {}",
                    "Time", "Latency", "Download", "Upload", "Client", "Status"
                )
                .bold()
            );
            for record in shown {
                println!("{}", table_row(record));
            }
            if records.len() > shown.len() {
                println!("... {} older results", records.len() - shown.len());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn show_status(
    config: &EngineConfig,
    path: &std::path::Path,
    detailed: bool,
) -> anyhow::Result<ExitCode> {
    let log = netgauge_history::open(&config.history);

    println!("netgauge speed test");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("History: {} ({} results)", log.location(), log.len());

    if detailed {
        let source = if path.exists() {
            path.display().to_string()
        } else {
            "built-in defaults".to_string()
        };
        println!("\nEffective configuration ({source}):\n");
        print!("{}", toml::to_string_pretty(config)?);
    }

    Ok(ExitCode::SUCCESS)
}

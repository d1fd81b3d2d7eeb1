//! Log shipper binary: batches lines read from stdin and ships them

use clap::Parser;
use log_shipper::ingest::ship_lines;
use log_shipper::line_parser::create_parser;
use log_shipper::{Config, FlushEngine, Result};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "log_shipper", version, about = "Ship log lines from stdin to a remote ingestion pipeline")]
struct Cli {
    /// JSON config file; environment variables and flags override it
    #[arg(short, long, env = "LOG_SHIPPER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    pipeline_repo: Option<String>,

    #[arg(long)]
    workflow_name: Option<String>,

    /// Seconds between timer flushes
    #[arg(long)]
    flush_interval: Option<i64>,

    /// Line format: auto, json or text
    #[arg(long, default_value = "auto")]
    format: String,

    /// Logger name for lines that do not carry one
    #[arg(long, default_value = "stdin")]
    logger: String,
}

#[tokio::main]
async fn main() {
    initialize_tracing();

    if let Err(e) = run(Cli::parse()).await {
        error!("Log shipper failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting log shipper v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?.merge_env(),
        None => Config::from_env(),
    };
    if let Some(repo) = cli.pipeline_repo {
        config.pipeline_repo = repo;
    }
    if let Some(name) = cli.workflow_name {
        config.workflow_name = name;
    }
    if let Some(interval) = cli.flush_interval {
        config.flush_interval_secs = interval;
    }

    info!(
        "Shipper configuration - Workflow: {}, Region: {}, Repo: {}, Host: {}",
        config.workflow_name, config.workflow_region, config.pipeline_repo, config.pipeline_host
    );

    let engine = FlushEngine::connect(config).await?;
    let parser = create_parser(&cli.format, &cli.logger);

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let shipped = ship_lines(
        BufReader::new(tokio::io::stdin()),
        parser.as_ref(),
        &engine,
        interrupted,
    )
    .await;

    engine.stop().await;
    info!("Log shipper finished after {} records", shipped?);
    Ok(())
}

/// Initialize structured logging on stderr
fn initialize_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

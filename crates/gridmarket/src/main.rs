use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gridmarket::agents::ReportSink;
use gridmarket::store::{SqliteReportSink, SqliteReportStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gridmarket", about = "Tick-driven energy market coordination engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/gridmarket.toml")]
    config: String,

    /// Number of ticks to run
    #[arg(short, long, default_value_t = 24)]
    ticks: u64,

    /// Persist every tick report to this SQLite database
    #[arg(long)]
    report_db: Option<String>,

    /// Override the population seed from the config
    #[arg(long)]
    seed: Option<u64>,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = gridmarket::load_config(&cli.config)?;
    if let Some(seed) = cli.seed {
        config.population.seed = seed;
    }

    let mut scheduler =
        gridmarket::build_scheduler(&config).context("Failed to build scheduler")?;

    if let Some(path) = &cli.report_db {
        let store = SqliteReportStore::open(path)
            .with_context(|| format!("Failed to open report database: {path}"))?;
        let sink = SqliteReportSink::new(Arc::new(store), scheduler.run_id().to_string());
        info!(path = %path, run = %sink.run_id(), sink = sink.name(), "Persisting tick reports");
        scheduler.add_sink(Arc::new(sink));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current tick");
            on_signal.cancel();
        }
    });

    let summary = scheduler
        .run(cli.ticks, cancel)
        .await
        .context("Market run aborted")?;

    let output = if cli.pretty {
        serde_json::to_string_pretty(&summary)?
    } else {
        serde_json::to_string(&summary)?
    };
    println!("{output}");

    Ok(())
}

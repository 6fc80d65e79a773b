use chrono::Local;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bicimad_collector::collector::Collector;
use bicimad_collector::config::Config;
use bicimad_collector::logging;
use bicimad_collector::scheduler::{
    default_window_start, interval_from_minutes, parse_local_datetime, CollectionWindow, Scheduler,
};

#[derive(Parser)]
#[command(name = "scheduled-collector")]
#[command(about = "Collect BiciMAD station data at a fixed interval within a time window", long_about = None)]
struct Cli {
    /// First collection, local time "YYYY-MM-DD HH:MM:SS" (default: tomorrow 09:00)
    #[arg(long)]
    start: Option<String>,

    /// Last allowed collection, local time "YYYY-MM-DD HH:MM:SS"
    #[arg(long)]
    end: String,

    /// Minutes between collections (default: COLLECTION_INTERVAL_MINUTES or 120)
    #[arg(long)]
    interval_minutes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    logging::init_tracing(&config.data_dir)?;

    let now = Local::now().naive_local();
    let start = match cli.start.as_deref() {
        Some(value) => parse_local_datetime(value)?,
        None => default_window_start(now),
    };
    let end = parse_local_datetime(&cli.end)?;
    let window = CollectionWindow::new(start, end)?;
    let interval = interval_from_minutes(
        cli.interval_minutes
            .unwrap_or(config.collection_interval_minutes),
    )?;

    let mut collector = Collector::from_config(&config)?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => shutdown.cancel(),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }

    let mut scheduler = Scheduler::new(interval, shutdown);
    let reason = scheduler.run_window(&mut collector, window).await;
    info!(?reason, "Scheduled collection stopped");

    collector.stats().log_summary();
    Ok(())
}

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bicimad_collector::collector::Collector;
use bicimad_collector::config::Config;
use bicimad_collector::logging;
use bicimad_collector::scheduler::{interval_from_minutes, Scheduler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Missing token is fatal before anything else starts
    let config = Config::from_env()?;

    let log_path = logging::init_tracing(&config.data_dir)?;
    info!("Logging to {}", log_path.display());
    info!("Starting BiciMAD collector with config: {:?}", config);

    let mut collector = Collector::from_config(&config)?;
    let interval = interval_from_minutes(config.collection_interval_minutes)?;

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

    info!("Collector started. Press Ctrl+C to stop.");
    let mut scheduler = Scheduler::new(interval, shutdown);
    let reason = scheduler.run_interval(&mut collector).await;
    info!(?reason, "Collector stopped");

    collector.stats().log_summary();
    Ok(())
}

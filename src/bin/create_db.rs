//! Rebuild the SQLite database from the cleaned station CSV files

use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use bicimad_collector::db::{connect_sqlite, StationDatabase};

#[derive(Parser)]
#[command(name = "create-db")]
#[command(about = "Load cleaned BiciMAD station tables into SQLite (replacing existing tables)", long_about = None)]
struct Cli {
    /// Directory holding bicimad_stations.csv and bicimad_station_status.csv
    #[arg(long, default_value = "data/cleaned")]
    cleaned_dir: PathBuf,

    /// SQLite database file to create or update
    #[arg(long, env = "BICIMAD_DATABASE", default_value = "data/processed/bicimad_database.db")]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Check inputs before creating or touching the database file
    if let Err(e) = StationDatabase::input_paths(&cli.cleaned_dir) {
        error!("{}", e);
        return Err(e.into());
    }

    let pool = connect_sqlite(&cli.database).await?;
    let database = StationDatabase::new(pool.clone());

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>16} [{bar:40.cyan/blue}] {pos}/{len} rows")?
            .progress_chars("=>-"),
    );

    let stats = database.import_tables(&cli.cleaned_dir, &progress).await?;
    progress.finish_and_clear();

    for table in &stats {
        info!(
            "Table '{}': {} rows, {} columns",
            table.table, table.rows, table.columns
        );
    }

    pool.close().await;
    info!("Database connection closed: {}", cli.database.display());
    Ok(())
}

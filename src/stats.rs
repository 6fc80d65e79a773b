use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

/// Counters for the lifetime of one collector process
#[derive(Debug, Clone, Serialize)]
pub struct CycleStats {
    pub started_at: DateTime<Local>,
    pub cycles_attempted: u64,
    pub collections_made: u64,
    pub files_written: u64,
    pub errors: u64,
    pub anomalies: u64,
}

impl CycleStats {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            cycles_attempted: 0,
            collections_made: 0,
            files_written: 0,
            errors: 0,
            anomalies: 0,
        }
    }

    pub fn log_summary(&self) {
        let elapsed = Local::now() - self.started_at;
        let secs = elapsed.num_seconds().max(0);

        info!("{}", "=".repeat(50));
        info!("Collection statistics:");
        info!(
            "Run time: {}h {:02}m {:02}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        );
        info!("Cycles attempted: {}", self.cycles_attempted);
        info!("Collections made: {}", self.collections_made);
        info!("Files written: {}", self.files_written);
        info!("Station anomalies: {}", self.anomalies);
        info!("Errors: {}", self.errors);
        info!("{}", "=".repeat(50));
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

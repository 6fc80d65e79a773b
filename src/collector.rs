use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use chrono::{Local, NaiveDateTime, SubsecRound};
use futures::FutureExt;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::extractor::extract_batch;
use crate::fetch_error::FetchError;
use crate::fetcher::StationFetcher;
use crate::scheduler::CycleRunner;
use crate::stats::CycleStats;
use crate::storage::{HistoryAppender, SnapshotStore};

/// How a single collection cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Collected { rows: usize, anomalies: usize },
    FetchFailed,
    NoRecords,
    PersistFailed,
    Panicked,
}

/// Runs fetch -> snapshot -> extract -> append cycles and keeps the
/// process-wide counters. Nothing that goes wrong inside a cycle escapes it.
pub struct Collector {
    fetcher: StationFetcher,
    snapshots: SnapshotStore,
    history: HistoryAppender,
    stats: CycleStats,
    #[cfg(test)]
    panic_next_cycle: bool,
}

impl Collector {
    /// Lays out `<data_dir>/collections` for snapshots and `<data_dir>/csv` for tables
    pub fn new(fetcher: StationFetcher, data_dir: &Path) -> Self {
        Self {
            fetcher,
            snapshots: SnapshotStore::new(data_dir.join("collections")),
            history: HistoryAppender::new(data_dir.join("csv")),
            stats: CycleStats::new(),
            #[cfg(test)]
            panic_next_cycle: false,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let fetcher = StationFetcher::new(config)?;
        Ok(Self::new(fetcher, &config.data_dir))
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn history(&self) -> &HistoryAppender {
        &self.history
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Run one cycle stamped with `capture_time`
    #[instrument(skip(self))]
    pub async fn run_cycle_at(&mut self, capture_time: NaiveDateTime) -> CycleOutcome {
        self.stats.cycles_attempted += 1;
        info!("Starting collection");

        match AssertUnwindSafe(self.collect(capture_time)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!("Error during collection: {}", panic_message(panic.as_ref()));
                self.stats.errors += 1;
                CycleOutcome::Panicked
            }
        }
    }

    async fn collect(&mut self, capture_time: NaiveDateTime) -> CycleOutcome {
        #[cfg(test)]
        if std::mem::take(&mut self.panic_next_cycle) {
            panic!("injected cycle fault");
        }

        let payload = match self.fetcher.fetch_stations().await {
            Ok(payload) => payload,
            Err(e) => {
                error!("Error fetching station information: {}", e);
                error!("Could not fetch data in this collection");
                self.stats.errors += 1;
                return CycleOutcome::FetchFailed;
            }
        };

        // The snapshot is an independent deliverable; extraction goes ahead without it
        match self.snapshots.store(&payload, capture_time).await {
            Ok(_) => self.stats.files_written += 1,
            Err(e) => {
                error!("Failed to save raw snapshot: {}", e);
                self.stats.errors += 1;
            }
        }

        let report = match extract_batch(&payload, capture_time) {
            Ok(report) => report,
            Err(e) => {
                error!("Data processing failed: {}", e);
                self.stats.errors += 1;
                return CycleOutcome::NoRecords;
            }
        };
        self.stats.anomalies += report.anomalies.len() as u64;

        match self.history.append(&report.records).await {
            Ok(Some(_)) => self.stats.files_written += 1,
            Ok(None) => {
                warn!("Nothing appended to history");
            }
            Err(e) => {
                error!("Failed to update CSV history: {}", e);
                self.stats.errors += 1;
                return CycleOutcome::PersistFailed;
            }
        }

        // The rows are already in the history; a failed per-cycle copy is
        // counted but does not undo that
        match self
            .history
            .write_cycle_file(&report.records, capture_time)
            .await
        {
            Ok(Some(_)) => self.stats.files_written += 1,
            Ok(None) => {}
            Err(e) => {
                error!("Failed to save per-cycle CSV: {}", e);
                self.stats.errors += 1;
            }
        }

        self.stats.collections_made += 1;
        info!("Collection completed successfully");

        CycleOutcome::Collected {
            rows: report.records.len(),
            anomalies: report.anomalies.len(),
        }
    }
}

impl CycleRunner for Collector {
    async fn run_cycle(&mut self) {
        let outcome = self.run_cycle_at(cycle_timestamp()).await;
        info!(?outcome, "Collection cycle finished");
    }
}

/// Local wall-clock time truncated to whole seconds
pub fn cycle_timestamp() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

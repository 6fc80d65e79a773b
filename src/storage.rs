pub mod error;
pub mod history;
pub mod snapshot;

pub use error::StorageError;
pub use history::{AppendOutcome, HistoryAppender};
pub use snapshot::SnapshotStore;

use chrono::NaiveDateTime;

/// `YYYYMMDD` directory name for a capture time
pub fn date_dir(capture_time: NaiveDateTime) -> String {
    capture_time.format("%Y%m%d").to_string()
}

/// `stations_HHMMSS` file stem for a capture time
pub fn file_stem(capture_time: NaiveDateTime) -> String {
    capture_time.format("stations_%H%M%S").to_string()
}

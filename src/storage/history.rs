use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{error, info, instrument, warn};

use super::{date_dir, file_stem, StorageError};
use crate::extractor::StationRecord;

pub const HISTORY_FILE_NAME: &str = "bicimad_stations_data.csv";

/// Result of one successful history append
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    pub history_path: PathBuf,
    pub rows: usize,
    /// True when this append created the history file (and wrote its header)
    pub created: bool,
}

/// Cumulative CSV history plus one standalone CSV per cycle.
///
/// The history file is only ever opened in append mode; rows already on disk
/// are never rewritten or reordered. The per-cycle file is written by a
/// separate call so that its failure cannot mask a history append that
/// already happened.
#[derive(Clone)]
pub struct HistoryAppender {
    csv_dir: PathBuf,
    history_path: PathBuf,
}

impl HistoryAppender {
    pub fn new(csv_dir: impl Into<PathBuf>) -> Self {
        let csv_dir = csv_dir.into();
        let history_path = csv_dir.join(HISTORY_FILE_NAME);
        Self {
            csv_dir,
            history_path,
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn cycle_path_for(&self, capture_time: NaiveDateTime) -> PathBuf {
        self.csv_dir
            .join(date_dir(capture_time))
            .join(format!("{}.csv", file_stem(capture_time)))
    }

    /// Append one cycle's records to the history. An empty batch writes
    /// nothing and returns `None`.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn append(
        &self,
        records: &[StationRecord],
    ) -> Result<Option<AppendOutcome>, StorageError> {
        if records.is_empty() {
            warn!("No data to update the CSV");
            return Ok(None);
        }

        fs::create_dir_all(&self.csv_dir)
            .await
            .map_err(|e| StorageError::io(&self.csv_dir, e))?;

        let created = self.append_history(records).await?;
        if created {
            info!("CSV created: {}", self.history_path.display());
        } else {
            info!("CSV updated: {}", self.history_path.display());
        }

        Ok(Some(AppendOutcome {
            history_path: self.history_path.clone(),
            rows: records.len(),
            created,
        }))
    }

    /// Write this cycle's records, with header, to
    /// `<csv_dir>/<YYYYMMDD>/stations_<HHMMSS>.csv`. Empty input writes nothing.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn write_cycle_file(
        &self,
        records: &[StationRecord],
        capture_time: NaiveDateTime,
    ) -> Result<Option<PathBuf>, StorageError> {
        if records.is_empty() {
            return Ok(None);
        }

        let cycle_path = self.cycle_path_for(capture_time);
        if let Some(dir) = cycle_path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(dir, e))?;
        }
        let body = encode_csv(records, true, &cycle_path)?;
        fs::write(&cycle_path, body)
            .await
            .map_err(|e| StorageError::io(&cycle_path, e))?;
        info!("Collection data saved to: {}", cycle_path.display());

        Ok(Some(cycle_path))
    }

    /// Returns whether the header was written (i.e. the file was new or empty)
    async fn append_history(&self, records: &[StationRecord]) -> Result<bool, StorageError> {
        let path = &self.history_path;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;

        let len = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(path, e))?
            .len();
        let is_new = len == 0;

        let mut body = Vec::new();
        let terminated = is_new
            || ends_with_newline(&mut file, len)
                .await
                .map_err(|e| StorageError::io(path, e))?;
        if !terminated {
            // An interrupted earlier write; keep our first row off its last line
            warn!("History file does not end with a newline, terminating last row");
            body.push(b'\n');
        }
        body.extend(encode_csv(records, is_new, path)?);

        if let Err(e) = write_synced(&mut file, &body).await {
            error!("History write failed, restoring previous length {}: {}", len, e);
            if let Err(rollback) = truncate_to(&file, len).await {
                error!("Could not restore history file length: {}", rollback);
            }
            return Err(StorageError::io(path, e));
        }

        Ok(is_new)
    }
}

async fn write_synced(file: &mut fs::File, body: &[u8]) -> std::io::Result<()> {
    file.write_all(body).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Drop anything a failed write left past `len`
async fn truncate_to(file: &fs::File, len: u64) -> std::io::Result<()> {
    file.set_len(len).await?;
    file.sync_data().await
}

async fn ends_with_newline(file: &mut fs::File, len: u64) -> std::io::Result<bool> {
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

fn encode_csv(records: &[StationRecord], headers: bool, path: &Path) -> Result<Vec<u8>, StorageError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(headers)
        .from_writer(Vec::new());
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| StorageError::csv(path, e))?;
    }
    writer
        .into_inner()
        .map_err(|e| StorageError::io(path, std::io::Error::other(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 8)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn record(id: &str, timestamp: NaiveDateTime) -> StationRecord {
        StationRecord {
            timestamp,
            station_id: id.to_string(),
            name: "Plaza de Espana".to_string(),
            address: "Plaza de Espana, 1".to_string(),
            longitude: -3.7122,
            latitude: 40.4233,
            total_bases: 24,
            active_bases: 20,
            available_bikes: 8,
            free_bases: 12,
            reservations: 0,
            status: 1,
        }
    }

    const HEADER: &str = "timestamp,station_id,name,address,longitude,latitude,total_bases,active_bases,available_bikes,free_bases,reservations,status";

    #[tokio::test]
    async fn test_first_append_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let appender = HistoryAppender::new(dir.path().join("csv"));

        let outcome = appender
            .append(&[record("1", at(9, 0, 0))])
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.rows, 1);

        let history = std::fs::read_to_string(appender.history_path()).unwrap();
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(
            lines[1],
            "2025-04-08 09:00:00,1,Plaza de Espana,\"Plaza de Espana, 1\",-3.7122,40.4233,24,20,8,12,0,1"
        );
    }

    #[tokio::test]
    async fn test_later_appends_keep_prior_rows() {
        let dir = tempfile::tempdir().unwrap();
        let appender = HistoryAppender::new(dir.path().join("csv"));

        appender
            .append(&[record("1", at(9, 0, 0)), record("2", at(9, 0, 0))])
            .await
            .unwrap();
        let before = std::fs::read(appender.history_path()).unwrap();

        let outcome = appender
            .append(&[record("1", at(11, 0, 0)), record("2", at(11, 0, 0))])
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.created);

        let after = std::fs::read(appender.history_path()).unwrap();
        assert!(after.starts_with(&before));

        let history = String::from_utf8(after).unwrap();
        assert_eq!(history.lines().filter(|l| *l == HEADER).count(), 1);
        assert_eq!(history.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_cycle_file_is_standalone() {
        let dir = tempfile::tempdir().unwrap();
        let appender = HistoryAppender::new(dir.path().join("csv"));

        appender.append(&[record("1", at(9, 0, 0))]).await.unwrap();
        let records = [record("7", at(11, 30, 5))];
        appender.append(&records).await.unwrap();
        let cycle_path = appender
            .write_cycle_file(&records, at(11, 30, 5))
            .await
            .unwrap()
            .unwrap();

        assert!(cycle_path.ends_with("20250408/stations_113005.csv"));
        let cycle = std::fs::read_to_string(&cycle_path).unwrap();
        let lines: Vec<&str> = cycle.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("2025-04-08 11:30:05,7,"));
    }

    #[tokio::test]
    async fn test_cycle_file_failure_leaves_history_alone() {
        let dir = tempfile::tempdir().unwrap();
        let appender = HistoryAppender::new(dir.path().join("csv"));
        std::fs::create_dir_all(dir.path().join("csv")).unwrap();
        // A plain file where the day directory should be
        std::fs::write(dir.path().join("csv/20250408"), b"").unwrap();

        let records = [record("1", at(9, 0, 0))];
        appender.append(&records).await.unwrap();
        let result = appender.write_cycle_file(&records, at(9, 0, 0)).await;

        assert!(matches!(result, Err(StorageError::Io { .. })));
        let history = std::fs::read_to_string(appender.history_path()).unwrap();
        assert_eq!(history.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_truncate_to_drops_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE_NAME);
        let committed = format!("{HEADER}\n2025-04-08 09:00:00,1,A,B,1.0,2.0,3,3,1,2,0,1\n");
        std::fs::write(&path, &committed).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        // Half a row, as left behind by a write that ran out of space
        file.write_all(b"2025-04-08 11:00:00,1,A,B,1.0").await.unwrap();
        file.flush().await.unwrap();

        truncate_to(&file, committed.len() as u64).await.unwrap();
        drop(file);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), committed);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let appender = HistoryAppender::new(dir.path().join("csv"));

        assert!(appender.append(&[]).await.unwrap().is_none());
        assert!(appender
            .write_cycle_file(&[], at(9, 0, 0))
            .await
            .unwrap()
            .is_none());
        assert!(!appender.history_path().exists());
        assert!(!appender.cycle_path_for(at(9, 0, 0)).exists());
    }

    #[tokio::test]
    async fn test_empty_existing_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let appender = HistoryAppender::new(dir.path().join("csv"));
        std::fs::create_dir_all(dir.path().join("csv")).unwrap();
        std::fs::write(appender.history_path(), b"").unwrap();

        let outcome = appender
            .append(&[record("1", at(9, 0, 0))])
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.created);

        let history = std::fs::read_to_string(appender.history_path()).unwrap();
        assert!(history.starts_with(HEADER));
    }

    #[tokio::test]
    async fn test_unterminated_last_row_is_not_merged() {
        let dir = tempfile::tempdir().unwrap();
        let appender = HistoryAppender::new(dir.path().join("csv"));
        std::fs::create_dir_all(dir.path().join("csv")).unwrap();
        let partial = format!("{HEADER}\n2025-04-08 07:00:00,1,A,B,1.0,2.0,3,3,1,2,0,1");
        std::fs::write(appender.history_path(), &partial).unwrap();

        appender.append(&[record("2", at(9, 0, 0))]).await.unwrap();

        let history = std::fs::read_to_string(appender.history_path()).unwrap();
        assert!(history.starts_with(&partial));
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("2025-04-08 09:00:00,2,"));
    }
}

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{date_dir, file_stem, StorageError};

/// Raw API responses, one immutable JSON file per capture under
/// `<root>/<YYYYMMDD>/stations/stations_<HHMMSS>.json`.
#[derive(Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, capture_time: NaiveDateTime) -> PathBuf {
        self.root
            .join(date_dir(capture_time))
            .join("stations")
            .join(format!("{}.json", file_stem(capture_time)))
    }

    #[instrument(skip(self, payload))]
    pub async fn store(&self, payload: &Value, capture_time: NaiveDateTime) -> Result<PathBuf, StorageError> {
        let path = self.path_for(capture_time);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(dir, e))?;
        }

        let bytes = to_pretty_json(payload)?;
        debug!("Writing {} byte snapshot", bytes.len());
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io(&path, e))?;

        info!("Data saved as JSON: {}", path.display());
        Ok(path)
    }
}

// serde_json never escapes non-ASCII, so accented names stay readable
fn to_pretty_json(payload: &Value) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    payload.serialize(&mut serializer)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn capture() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 7)
            .unwrap()
            .and_hms_opt(14, 5, 9)
            .unwrap()
    }

    #[test]
    fn test_path_layout() {
        let store = SnapshotStore::new("/data/collections");
        assert_eq!(
            store.path_for(capture()),
            PathBuf::from("/data/collections/20250407/stations/stations_140509.json")
        );
    }

    #[tokio::test]
    async fn test_store_writes_verbatim_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("collections"));
        let payload = json!({ "code": "00", "data": [{ "id": 1, "name": "Plaza de España" }] });

        let path = store.store(&payload, capture()).await.unwrap();
        assert!(path.ends_with("20250407/stations/stations_140509.json"));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Plaza de España"));
        assert!(written.contains("\n    \"code\": \"00\""));

        let parsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, payload);
    }

    #[tokio::test]
    async fn test_store_propagates_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the snapshot root directory should be
        let blocker = dir.path().join("collections");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = SnapshotStore::new(&blocker);
        let result = store.store(&json!({ "data": [] }), capture()).await;
        assert!(matches!(result, Err(StorageError::Io { .. })));
    }
}

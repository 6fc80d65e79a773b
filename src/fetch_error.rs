#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Station API returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("Station API returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::fetch_error::FetchError;

pub const STATIONS_ENDPOINT: &str = "bicimad/stations/";

#[derive(Clone)]
pub struct StationFetcher {
    client: reqwest::Client,
    url: String,
    access_token: String,
}

impl StationFetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Self::with_base_url(
            &config.api_url,
            config.access_token.clone(),
            Duration::from_secs(config.fetch_timeout_secs),
        )
    }

    /// Build a fetcher against an arbitrary API root (the station endpoint is
    /// appended). The timeout bounds the whole request; failures are not retried.
    pub fn with_base_url(
        base_url: &str,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let separator = if base_url.ends_with('/') { "" } else { "/" };

        Ok(Self {
            client,
            url: format!("{base_url}{separator}{STATIONS_ENDPOINT}"),
            access_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch_stations(&self) -> Result<Value, FetchError> {
        debug!("Sending HTTP request to station API");
        let response = self
            .client
            .get(&self.url)
            .header("accessToken", &self.access_token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        debug!("Received HTTP response with status: {}", status);
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.text().await?;
        debug!("Retrieved response body, size: {} bytes", body.len());

        Ok(serde_json::from_str(&body)?)
    }
}

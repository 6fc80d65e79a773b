use std::env;
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "https://openapi.emtmadrid.es/v1/transport/";
pub const DEFAULT_INTERVAL_MINUTES: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ACCESS_TOKEN is not set (add it to the environment or the .env file)")]
    MissingAccessToken,
}

#[derive(Clone)]
pub struct Config {
    pub access_token: String,
    pub api_url: String,
    pub data_dir: PathBuf,
    pub collection_interval_minutes: u64,
    pub fetch_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // BICIMAD_ACCESS_TOKEN is the name older .env files use
        let access_token = env::var("ACCESS_TOKEN")
            .or_else(|_| env::var("BICIMAD_ACCESS_TOKEN"))
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingAccessToken)?;

        Ok(Config {
            access_token,
            api_url: env::var("BICIMAD_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            data_dir: env::var("BICIMAD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("bicimad_data")),
            collection_interval_minutes: env::var("COLLECTION_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|minutes| *minutes > 0)
                .unwrap_or(DEFAULT_INTERVAL_MINUTES),
            fetch_timeout_secs: env::var("FETCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        })
    }
}

// Keeps the token out of startup logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("access_token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("data_dir", &self.data_dir)
            .field("collection_interval_minutes", &self.collection_interval_minutes)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .finish()
    }
}

pub mod collector;
pub mod config;
pub mod db;
pub mod extractor;
pub mod fetch_error;
pub mod fetcher;
pub mod logging;
pub mod normalize;
pub mod scheduler;
pub mod stats;
pub mod storage;

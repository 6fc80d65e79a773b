#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use bicimad_collector::collector::Collector;
use bicimad_collector::fetcher::StationFetcher;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Value};

pub const TEST_TOKEN: &str = "test-token";
pub const STATIONS_PATH: &str = "/bicimad/stations/";

/// Collector writing under `data_dir`, fetching from a mock server root
pub fn test_collector(server_url: &str, data_dir: &Path) -> Collector {
    let fetcher =
        StationFetcher::with_base_url(server_url, TEST_TOKEN.to_string(), Duration::from_secs(5))
            .expect("Failed to build fetcher");
    Collector::new(fetcher, data_dir)
}

pub fn capture_time(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 4, 10)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

pub fn station(id: i64) -> Value {
    json!({
        "id": id,
        "number": format!("{id}a"),
        "name": format!("{id} - Plaza de España"),
        "address": "Plaza de España nº 1",
        "geometry": { "type": "Point", "coordinates": [-3.7122 - id as f64 / 1000.0, 40.4233] },
        "dock_bikes": 8,
        "free_bases": 12,
        "total_bases": 24,
        "reservations": 0,
        "activate": 1,
        "light": 1
    })
}

pub fn payload(ids: impl IntoIterator<Item = i64>) -> String {
    let data: Vec<Value> = ids.into_iter().map(station).collect();
    json!({ "code": "00", "description": "Data recovered OK", "data": data }).to_string()
}

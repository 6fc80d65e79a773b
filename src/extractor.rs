use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::normalize::normalize_text;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One station observed at one collection cycle. Field order is the column
/// order of the history CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationRecord {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    pub station_id: String,
    pub name: String,
    pub address: String,
    pub longitude: f64,
    pub latitude: f64,
    pub total_bases: i64,
    pub active_bases: i64,
    pub available_bikes: i64,
    pub free_bases: i64,
    pub reservations: i64,
    pub status: u8,
}

fn serialize_timestamp<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

impl StationRecord {
    /// A zero longitude or latitude means the API did not give us a location
    pub fn has_unresolved_coordinates(&self) -> bool {
        self.longitude == 0.0 || self.latitude == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    #[error("station entry is not a JSON object")]
    NotAnObject,
    #[error("station entry has no usable id")]
    MissingId,
    #[error("field '{0}' is not numeric")]
    InvalidField(&'static str),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error("payload has no 'data' array")]
    MissingData,
    #[error("no valid station records among {entries} entries")]
    NoValidRecords { entries: usize },
}

/// Per-entry problems that do not stop the batch
#[derive(Debug, Clone, PartialEq)]
pub enum StationAnomaly {
    UnresolvedCoordinates { station_id: String, name: String },
    Malformed { index: usize, error: ExtractError },
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub records: Vec<StationRecord>,
    pub anomalies: Vec<StationAnomaly>,
}

impl ExtractionReport {
    pub fn malformed_count(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|a| matches!(a, StationAnomaly::Malformed { .. }))
            .count()
    }

    pub fn unresolved_coordinate_count(&self) -> usize {
        self.anomalies.len() - self.malformed_count()
    }
}

type Station = Map<String, Value>;
type Probe<T> = fn(&Station) -> Result<Option<T>, ExtractError>;

// Each field is resolved by trying its probes in order until one yields a
// non-zero value. Missing everywhere resolves to zero.
const LONGITUDE: &[Probe<f64>] = &[geometry_longitude, flat_longitude];
const LATITUDE: &[Probe<f64>] = &[geometry_latitude, flat_latitude];
const AVAILABLE_BIKES: &[Probe<i64>] = &[dock_bikes, light_availability];
const FREE_BASES: &[Probe<i64>] = &[free_bases, light_free];
const TOTAL_BASES: &[Probe<i64>] = &[total_bases];
const RESERVATIONS: &[Probe<i64>] = &[reservations];

fn geometry_longitude(s: &Station) -> Result<Option<f64>, ExtractError> {
    geometry_coordinate(s, 0)
}

fn geometry_latitude(s: &Station) -> Result<Option<f64>, ExtractError> {
    geometry_coordinate(s, 1)
}

fn flat_longitude(s: &Station) -> Result<Option<f64>, ExtractError> {
    float_field(s, "longitude")
}

fn flat_latitude(s: &Station) -> Result<Option<f64>, ExtractError> {
    float_field(s, "latitude")
}

fn dock_bikes(s: &Station) -> Result<Option<i64>, ExtractError> {
    count_field(s, "dock_bikes")
}

fn light_availability(s: &Station) -> Result<Option<i64>, ExtractError> {
    light_count(s, "availability")
}

fn free_bases(s: &Station) -> Result<Option<i64>, ExtractError> {
    count_field(s, "free_bases")
}

fn light_free(s: &Station) -> Result<Option<i64>, ExtractError> {
    light_count(s, "free")
}

fn total_bases(s: &Station) -> Result<Option<i64>, ExtractError> {
    count_field(s, "total_bases")
}

fn reservations(s: &Station) -> Result<Option<i64>, ExtractError> {
    count_field(s, "reservations")
}

fn resolve<T>(station: &Station, probes: &[Probe<T>]) -> Result<T, ExtractError>
where
    T: Copy + Default + PartialEq,
{
    for probe in probes {
        if let Some(value) = probe(station)? {
            if value != T::default() {
                return Ok(value);
            }
        }
    }
    Ok(T::default())
}

fn as_float(value: Option<&Value>, field: &'static str) -> Result<Option<f64>, ExtractError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(_) => Err(ExtractError::InvalidField(field)),
    }
}

// Floats in [-2^63, 2^63) convert to i64 exactly
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

fn as_count(value: Option<&Value>, field: &'static str) -> Result<Option<i64>, ExtractError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Some(i)),
            // 12.0 style counts are accepted, 12.5 is not
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= I64_LOWER && f < I64_UPPER => Ok(Some(f as i64)),
                _ => Err(ExtractError::InvalidField(field)),
            },
        },
        Some(_) => Err(ExtractError::InvalidField(field)),
    }
}

fn float_field(station: &Station, field: &'static str) -> Result<Option<f64>, ExtractError> {
    as_float(station.get(field), field)
}

fn count_field(station: &Station, field: &'static str) -> Result<Option<i64>, ExtractError> {
    as_count(station.get(field), field)
}

fn geometry_coordinate(station: &Station, index: usize) -> Result<Option<f64>, ExtractError> {
    let coordinate = station
        .get("geometry")
        .and_then(|g| g.get("coordinates"))
        .and_then(|c| c.as_array())
        .and_then(|c| c.get(index));
    as_float(coordinate, "geometry.coordinates")
}

/// Nested `light` counts; ignored unless `light` is an object
fn light_count(station: &Station, field: &'static str) -> Result<Option<i64>, ExtractError> {
    match station.get("light") {
        Some(Value::Object(light)) => as_count(light.get(field), field),
        _ => Ok(None),
    }
}

fn station_id(station: &Station) -> Result<String, ExtractError> {
    match station.get("id") {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(ExtractError::MissingId),
    }
}

fn text_field(station: &Station, field: &str) -> String {
    station
        .get(field)
        .and_then(Value::as_str)
        .map(normalize_text)
        .unwrap_or_default()
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        None | Some(Value::Null) => false,
    }
}

/// Flatten one raw station object into a record stamped with `timestamp`.
pub fn extract_station(raw: &Value, timestamp: NaiveDateTime) -> Result<StationRecord, ExtractError> {
    let station = raw.as_object().ok_or(ExtractError::NotAnObject)?;
    let station_id = station_id(station)?;

    let longitude = resolve(station, LONGITUDE)?;
    let latitude = resolve(station, LATITUDE)?;
    let available_bikes = resolve(station, AVAILABLE_BIKES)?;
    let free_bases = resolve(station, FREE_BASES)?;
    let active_bases = available_bikes
        .checked_add(free_bases)
        .ok_or(ExtractError::InvalidField("active_bases"))?;

    let mut total_bases = resolve(station, TOTAL_BASES)?;
    if total_bases == 0 {
        total_bases = active_bases;
    } else if total_bases < active_bases {
        warn!(
            station_id = %station_id,
            total_bases, active_bases, "Reported total bases below active bases, using active bases"
        );
        total_bases = active_bases;
    }

    Ok(StationRecord {
        timestamp,
        station_id,
        name: text_field(station, "name"),
        address: text_field(station, "address"),
        longitude,
        latitude,
        total_bases,
        active_bases,
        available_bikes,
        free_bases,
        reservations: resolve(station, RESERVATIONS)?,
        status: u8::from(is_truthy(station.get("activate"))),
    })
}

/// Extract every entry of the payload's `data` array. Bad entries are
/// skipped and reported as anomalies; the batch only fails when nothing
/// usable is left.
#[instrument(skip(payload))]
pub fn extract_batch(payload: &Value, timestamp: NaiveDateTime) -> Result<ExtractionReport, BatchError> {
    let entries = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or(BatchError::MissingData)?;

    let mut report = ExtractionReport::default();

    for (index, entry) in entries.iter().enumerate() {
        match extract_station(entry, timestamp) {
            Ok(record) => {
                if record.has_unresolved_coordinates() {
                    warn!(
                        station_id = %record.station_id,
                        name = %record.name,
                        "Coordinates not found for station"
                    );
                    report.anomalies.push(StationAnomaly::UnresolvedCoordinates {
                        station_id: record.station_id.clone(),
                        name: record.name.clone(),
                    });
                }
                report.records.push(record);
            }
            Err(error) => {
                warn!(index, error = %error, "Skipping malformed station entry");
                report.anomalies.push(StationAnomaly::Malformed { index, error });
            }
        }
    }

    if report.records.is_empty() {
        return Err(BatchError::NoValidRecords {
            entries: entries.len(),
        });
    }

    let malformed = report.malformed_count();
    if malformed > 0 {
        warn!("Skipped {} malformed entries out of {}", malformed, entries.len());
    }
    info!("Processed data: {} stations", report.records.len());
    if let Some(first) = report.records.first() {
        debug!("Sample record (first row): {:?}", first);
    }

    Ok(report)
}

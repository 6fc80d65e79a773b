pub mod csv_table;
pub mod error;
pub mod pool;
pub mod station_database;

pub use csv_table::{Affinity, Column, CsvTable};
pub use error::DbError;
pub use pool::{connect_in_memory, connect_sqlite};
pub use station_database::{ImportStats, StationDatabase, STATIONS_TABLE, STATION_STATUS_TABLE};

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, instrument};

use crate::db::csv_table::{Affinity, CsvTable};
use crate::db::DbError;

pub const STATIONS_CSV: &str = "bicimad_stations.csv";
pub const STATION_STATUS_CSV: &str = "bicimad_station_status.csv";

#[derive(Debug, Clone, Copy)]
pub struct IndexSpec {
    pub name: &'static str,
    pub column: &'static str,
    pub unique: bool,
}

/// A table rebuilt from one cleaned CSV file
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub table: &'static str,
    pub file_name: &'static str,
    pub indexes: &'static [IndexSpec],
}

pub const STATIONS_TABLE: TableSpec = TableSpec {
    table: "stations",
    file_name: STATIONS_CSV,
    indexes: &[IndexSpec {
        name: "idx_stations_public_id",
        column: "public_station_id",
        unique: true,
    }],
};

pub const STATION_STATUS_TABLE: TableSpec = TableSpec {
    table: "station_status",
    file_name: STATION_STATUS_CSV,
    indexes: &[
        IndexSpec {
            name: "idx_station_status_public_id",
            column: "public_station_id",
            unique: false,
        },
        IndexSpec {
            name: "idx_station_status_timestamp",
            column: "timestamp",
            unique: false,
        },
        IndexSpec {
            name: "idx_station_status_real_status",
            column: "real_status",
            unique: false,
        },
    ],
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub table: &'static str,
    pub rows: usize,
    pub columns: usize,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The queryable projection of the cleaned station data. Every import
/// replaces table contents wholesale; nothing is merged.
#[derive(Clone)]
pub struct StationDatabase {
    pool: SqlitePool,
}

impl StationDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Both input paths, failing before any database work if one is missing
    pub fn input_paths(cleaned_dir: &Path) -> Result<(PathBuf, PathBuf), DbError> {
        let stations = cleaned_dir.join(STATIONS_TABLE.file_name);
        let status = cleaned_dir.join(STATION_STATUS_TABLE.file_name);
        for path in [&stations, &status] {
            if !path.is_file() {
                return Err(DbError::MissingInput(path.clone()));
            }
        }
        Ok((stations, status))
    }

    /// Rebuild `stations` and `station_status` from the cleaned CSV directory
    #[instrument(skip(self, progress))]
    pub async fn import_tables(
        &self,
        cleaned_dir: &Path,
        progress: &ProgressBar,
    ) -> Result<Vec<ImportStats>, DbError> {
        let (stations, status) = Self::input_paths(cleaned_dir)?;

        let mut stats = Vec::new();
        for (spec, path) in [(STATIONS_TABLE, stations), (STATION_STATUS_TABLE, status)] {
            let table = tokio::task::spawn_blocking(move || CsvTable::load(&path)).await??;
            info!(
                "Loaded {} rows for '{}' from {}",
                table.rows.len(),
                spec.table,
                table.source.display()
            );
            stats.push(self.replace_table(&spec, &table, progress).await?);
        }
        Ok(stats)
    }

    /// Drop and recreate one table with its indexes in a single transaction.
    /// On any failure the previous table is left untouched.
    #[instrument(skip(self, spec, table, progress), fields(table = spec.table, rows = table.rows.len()))]
    pub async fn replace_table(
        &self,
        spec: &TableSpec,
        table: &CsvTable,
        progress: &ProgressBar,
    ) -> Result<ImportStats, DbError> {
        for index in spec.indexes {
            if table.column_index(index.column).is_none() {
                return Err(DbError::MissingColumn {
                    table: spec.table.to_string(),
                    column: index.column.to_string(),
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        let name = quote_ident(spec.table);

        sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
            .execute(&mut *tx)
            .await?;

        let column_defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.affinity.sql_type()))
            .collect();
        sqlx::query(&format!("CREATE TABLE {name} ({})", column_defs.join(", ")))
            .execute(&mut *tx)
            .await?;
        debug!("Created table {}", spec.table);

        progress.set_length(table.rows.len() as u64);
        progress.set_position(0);
        progress.set_message(spec.table);
        insert_rows(&mut tx, &name, table, progress).await?;

        for index in spec.indexes {
            let unique = if index.unique { "UNIQUE " } else { "" };
            sqlx::query(&format!(
                "CREATE {unique}INDEX IF NOT EXISTS {} ON {name}({})",
                quote_ident(index.name),
                quote_ident(index.column)
            ))
            .execute(&mut *tx)
            .await?;
            debug!("Created index {}", index.name);
        }

        tx.commit().await?;
        info!("Table '{}' created with {} rows", spec.table, table.rows.len());

        Ok(ImportStats {
            table: spec.table,
            rows: table.rows.len(),
            columns: table.columns.len(),
        })
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn index_names(&self, table: &str) -> Result<Vec<String>, DbError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ? ORDER BY name",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}

async fn insert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    table_name: &str,
    table: &CsvTable,
    progress: &ProgressBar,
) -> Result<(), DbError> {
    let column_list: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let placeholders = vec!["?"; table.columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {table_name} ({}) VALUES ({placeholders})",
        column_list.join(", ")
    );

    for row in &table.rows {
        let mut query = sqlx::query(&sql);
        for (column, cell) in table.columns.iter().zip(row) {
            let cell = cell.as_deref();
            query = match column.affinity {
                Affinity::Integer => query.bind(cell.and_then(|v| v.parse::<i64>().ok())),
                Affinity::Real => query.bind(cell.and_then(|v| v.parse::<f64>().ok())),
                Affinity::Text => query.bind(cell.map(str::to_string)),
            };
        }
        query.execute(&mut **tx).await?;
        progress.inc(1);
    }
    Ok(())
}

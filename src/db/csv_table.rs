use std::path::{Path, PathBuf};

use crate::db::DbError;

/// SQLite column affinity inferred from the CSV contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Real,
    Text,
}

impl Affinity {
    pub fn sql_type(self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Real => "REAL",
            Affinity::Text => "TEXT",
        }
    }

    fn accepts(self, value: &str) -> bool {
        match self {
            Affinity::Integer => value.parse::<i64>().is_ok(),
            Affinity::Real => value.parse::<f64>().is_ok(),
            Affinity::Text => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub affinity: Affinity,
}

/// A whole CSV file held in memory. Empty cells are `None`.
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub source: PathBuf,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn load(path: &Path) -> Result<Self, DbError> {
        let csv_err = |source| DbError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            rows.push(
                record
                    .iter()
                    .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                    .collect(),
            );
        }

        let columns = headers
            .into_iter()
            .enumerate()
            .map(|(idx, name)| Column {
                affinity: infer_affinity(rows.iter().filter_map(|row: &Vec<Option<String>>| {
                    row.get(idx).and_then(|cell| cell.as_deref())
                })),
                name,
            })
            .collect();

        Ok(Self {
            source: path.to_path_buf(),
            columns,
            rows,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Narrowest affinity every non-empty value fits; all-empty columns are TEXT
pub fn infer_affinity<'a>(values: impl Iterator<Item = &'a str>) -> Affinity {
    let mut affinity = Affinity::Integer;
    let mut seen = false;

    for value in values {
        seen = true;
        while !affinity.accepts(value) {
            affinity = match affinity {
                Affinity::Integer => Affinity::Real,
                Affinity::Real | Affinity::Text => Affinity::Text,
            };
        }
        if affinity == Affinity::Text {
            break;
        }
    }

    if seen {
        affinity
    } else {
        Affinity::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_affinity() {
        assert_eq!(infer_affinity(["1", "2", "-3"].into_iter()), Affinity::Integer);
        assert_eq!(infer_affinity(["1", "2.5"].into_iter()), Affinity::Real);
        assert_eq!(infer_affinity(["40.41", "x"].into_iter()), Affinity::Text);
        assert_eq!(infer_affinity(std::iter::empty()), Affinity::Text);
    }

    #[test]
    fn test_load_infers_columns_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.csv");
        std::fs::write(
            &path,
            "public_station_id,name,latitude,total_bases\n1a,Sol,40.41,24\n2,Opera,,\n",
        )
        .unwrap();

        let table = CsvTable::load(&path).unwrap();
        let affinities: Vec<Affinity> = table.columns.iter().map(|c| c.affinity).collect();
        assert_eq!(
            affinities,
            vec![Affinity::Text, Affinity::Text, Affinity::Real, Affinity::Integer]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][2], None);
        assert_eq!(table.column_index("total_bases"), Some(3));
        assert_eq!(table.column_index("missing"), None);
    }
}

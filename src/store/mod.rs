//! Persistence gateway: one SQLite table per canonical dataset.
//!
//! Row layout is `group columns (TEXT)..., timestamp (NUMERIC), metric (TEXT),
//! value (REAL)`. Reads are tolerant: numeric cells that do not parse come
//! back as nulls instead of failing the whole read.

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use tracing::{debug, info, warn};

use crate::domain::{
    CanonicalDataset, ColumnType, METRIC_COLUMN, Observation, TIMESTAMP_COLUMN, Timestamp, VALUE_COLUMN, WriteMode,
};
use crate::error::AppError;
use crate::normalize::{parse_date, parse_number, parse_year};
use crate::reconcile::dedup_prefer_last;

/// A single store connection, held for the lifetime of the process.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)
                .map_err(|e| AppError::Io(format!("Failed to create '{}': {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| AppError::Storage(format!("Failed to open store '{}': {e}", path.display())))?;
        debug!(path = %path.display(), "opened store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Release the connection, surfacing any error on close.
    pub fn close(self) -> Result<(), AppError> {
        self.conn
            .close()
            .map_err(|(_, e)| AppError::Storage(format!("Failed to close store: {e}")))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, AppError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_tables(&self) -> Result<Vec<String>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Create `table` with the given columns unless it already exists.
    pub fn create_schema(&self, table: &str, columns: &[(String, ColumnType)]) -> Result<(), AppError> {
        let sql = create_table_sql(table, columns)?;
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    /// Write `dataset` into `table`. Returns the number of rows written.
    pub fn write(&mut self, table: &str, dataset: &CanonicalDataset, mode: WriteMode) -> Result<usize, AppError> {
        let columns = dataset_columns(dataset);
        let exists = self.table_exists(table)?;

        if exists && mode == WriteMode::FailIfExists {
            return Err(AppError::TableAlreadyExists(table.to_string()));
        }
        if exists && mode == WriteMode::Append {
            let actual = self.table_columns(table)?;
            let expected: Vec<&str> = columns.iter().map(|(c, _)| c.as_str()).collect();
            if actual != expected {
                return Err(AppError::SchemaMismatch(format!(
                    "Cannot append to '{table}': table columns [{}] differ from dataset columns [{}].",
                    actual.join(", "),
                    expected.join(", ")
                )));
            }
        }

        let create_sql = create_table_sql(table, &columns)?;
        let insert_sql = insert_sql(table, &columns)?;

        let tx = self.conn.transaction()?;
        if mode == WriteMode::Replace {
            tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)?), [])?;
        }
        tx.execute(&create_sql, [])?;
        {
            let mut stmt = tx.prepare(&insert_sql)?;
            for obs in dataset.observations() {
                stmt.execute(params_from_iter(row_values(obs)))?;
            }
        }
        tx.commit()?;

        info!(table, rows = dataset.len(), mode = ?mode, "wrote table");
        Ok(dataset.len())
    }

    /// Read `table` back as a canonical dataset, optionally limited to `limit` rows.
    pub fn read(&self, table: &str, limit: Option<usize>) -> Result<CanonicalDataset, AppError> {
        if !self.table_exists(table)? {
            return Err(AppError::TableNotFound(table.to_string()));
        }

        let mut sql = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table)?);
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

        let find = |name: &str| names.iter().position(|c| c.eq_ignore_ascii_case(name));
        let (Some(ts_idx), Some(metric_idx), Some(value_idx)) =
            (find(TIMESTAMP_COLUMN), find(METRIC_COLUMN), find(VALUE_COLUMN))
        else {
            return Err(AppError::SchemaMismatch(format!(
                "Table '{table}' lacks the canonical `timestamp`, `metric` and `value` columns."
            )));
        };
        let group_idx: Vec<usize> = (0..names.len())
            .filter(|i| ![ts_idx, metric_idx, value_idx].contains(i))
            .collect();
        let group_columns: Vec<String> = group_idx.iter().map(|&i| names[i].clone()).collect();

        let mut observations = Vec::new();
        let mut skipped = 0usize;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let Some(metric) = coerce_text(row.get_ref(metric_idx)?) else {
                skipped += 1;
                continue;
            };
            observations.push(Observation {
                group: group_idx
                    .iter()
                    .map(|&i| row.get_ref(i).map(coerce_text))
                    .collect::<Result<_, _>>()?,
                timestamp: coerce_timestamp(row.get_ref(ts_idx)?),
                metric,
                value: coerce_number(row.get_ref(value_idx)?),
            });
        }

        if skipped > 0 {
            warn!(table, skipped, "skipped rows without a metric name");
        }
        let (observations, duplicates) = dedup_prefer_last(observations);
        if duplicates > 0 {
            warn!(table, duplicates, "table holds duplicate observation keys; kept the latest rows");
        }

        CanonicalDataset::new(group_columns, observations)
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, AppError> {
        let stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} LIMIT 0", quote_ident(table)?))?;
        Ok(stmt.column_names().into_iter().map(str::to_string).collect())
    }
}

/// Canonical storage layout for a dataset.
pub fn dataset_columns(dataset: &CanonicalDataset) -> Vec<(String, ColumnType)> {
    let mut columns: Vec<(String, ColumnType)> = dataset
        .group_columns()
        .iter()
        .map(|c| (c.clone(), ColumnType::Text))
        .collect();
    columns.push((TIMESTAMP_COLUMN.to_string(), ColumnType::Numeric));
    columns.push((METRIC_COLUMN.to_string(), ColumnType::Text));
    columns.push((VALUE_COLUMN.to_string(), ColumnType::Real));
    columns
}

fn quote_ident(name: &str) -> Result<String, AppError> {
    if name.trim().is_empty() || name.contains('\0') {
        return Err(AppError::SchemaMismatch(format!("Invalid table or column name '{name}'.")));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn create_table_sql(table: &str, columns: &[(String, ColumnType)]) -> Result<String, AppError> {
    if columns.is_empty() {
        return Err(AppError::SchemaMismatch(format!("Table '{table}' needs at least one column.")));
    }
    let defs = columns
        .iter()
        .map(|(name, ty)| -> Result<String, AppError> { Ok(format!("{} {}", quote_ident(name)?, ty.sql_name())) })
        .collect::<Result<Vec<String>, AppError>>()?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table)?,
        defs.join(", ")
    ))
}

fn insert_sql(table: &str, columns: &[(String, ColumnType)]) -> Result<String, AppError> {
    let names = columns
        .iter()
        .map(|(name, _)| quote_ident(name))
        .collect::<Result<Vec<String>, AppError>>()?;
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table)?,
        names.join(", "),
        placeholders.join(", ")
    ))
}

fn row_values(obs: &Observation) -> Vec<Value> {
    let mut values: Vec<Value> = obs
        .group
        .iter()
        .map(|g| g.clone().map(Value::Text).unwrap_or(Value::Null))
        .collect();
    values.push(match obs.timestamp {
        Some(Timestamp::Year(y)) => Value::Integer(i64::from(y)),
        Some(ts @ Timestamp::Date(_)) => Value::Text(ts.to_string()),
        None => Value::Null,
    });
    values.push(Value::Text(obs.metric.clone()));
    values.push(obs.value.map(Value::Real).unwrap_or(Value::Null));
    values
}

fn coerce_text(v: ValueRef<'_>) -> Option<String> {
    match v {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().and_then(crate::data::raw::cell),
    }
}

fn coerce_number(v: ValueRef<'_>) -> Option<f64> {
    match v {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) if f.is_finite() => Some(f),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().and_then(parse_number),
        _ => None,
    }
}

fn coerce_timestamp(v: ValueRef<'_>) -> Option<Timestamp> {
    match v {
        ValueRef::Integer(i) => i32::try_from(i).ok().map(Timestamp::Year),
        ValueRef::Real(f) => parse_year(&f.to_string()).map(Timestamp::Year),
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes).ok()?;
            parse_year(s)
                .map(Timestamp::Year)
                .or_else(|| parse_date(s).map(Timestamp::Date))
        }
        _ => None,
    }
}

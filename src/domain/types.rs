//! Shared domain types.
//!
//! `CanonicalDataset` is the unit every stage after normalization works on. It
//! is schema-checked at construction so structural problems show up here
//! rather than at model-fit time.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Reserved canonical column names; group columns may not reuse them.
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const METRIC_COLUMN: &str = "metric";
pub const VALUE_COLUMN: &str = "value";

/// Observation time: a calendar year (FAOSTAT) or a day (market feeds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timestamp {
    Year(i32),
    Date(NaiveDate),
}

impl Timestamp {
    pub fn year(self) -> i32 {
        match self {
            Timestamp::Year(y) => y,
            Timestamp::Date(d) => d.year(),
        }
    }

    pub fn month(self) -> Option<u32> {
        match self {
            Timestamp::Year(_) => None,
            Timestamp::Date(d) => Some(d.month()),
        }
    }

    pub fn iso_week(self) -> Option<u32> {
        match self {
            Timestamp::Year(_) => None,
            Timestamp::Date(d) => Some(d.iso_week().week()),
        }
    }

    pub fn is_date(self) -> bool {
        matches!(self, Timestamp::Date(_))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Timestamp::Year(a), Timestamp::Year(b)) => a.cmp(b),
            (Timestamp::Date(a), Timestamp::Date(b)) => a.cmp(b),
            (Timestamp::Year(_), Timestamp::Date(_)) => Ordering::Less,
            (Timestamp::Date(_), Timestamp::Year(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Year(y) => write!(f, "{y}"),
            Timestamp::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// One measured fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Entity key values, aligned with the owning dataset's `group_columns`.
    pub group: Vec<Option<String>>,
    pub timestamp: Option<Timestamp>,
    pub metric: String,
    pub value: Option<f64>,
}

impl Observation {
    /// The `(entity_key, timestamp, metric)` identity.
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            group: self.group.clone(),
            timestamp: self.timestamp,
            metric: self.metric.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    pub group: Vec<Option<String>>,
    pub timestamp: Option<Timestamp>,
    pub metric: String,
}

/// Ordered, schema-checked sequence of observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDataset {
    group_columns: Vec<String>,
    observations: Vec<Observation>,
}

impl CanonicalDataset {
    pub fn new(group_columns: Vec<String>, observations: Vec<Observation>) -> Result<Self, AppError> {
        let mut seen = HashSet::new();
        for col in &group_columns {
            if col.trim().is_empty() {
                return Err(AppError::SchemaMismatch("Group column names must be non-empty.".to_string()));
            }
            // SQLite identifiers are case-insensitive.
            if [TIMESTAMP_COLUMN, METRIC_COLUMN, VALUE_COLUMN]
                .iter()
                .any(|reserved| col.eq_ignore_ascii_case(reserved))
            {
                return Err(AppError::SchemaMismatch(format!(
                    "Group column `{col}` collides with a reserved canonical column."
                )));
            }
            if !seen.insert(col.to_ascii_lowercase()) {
                return Err(AppError::SchemaMismatch(format!("Duplicate group column `{col}`.")));
            }
        }

        if let Some(bad) = observations.iter().find(|o| o.group.len() != group_columns.len()) {
            return Err(AppError::SchemaMismatch(format!(
                "Observation has {} group values but the dataset declares {} group columns.",
                bad.group.len(),
                group_columns.len()
            )));
        }

        Ok(Self {
            group_columns,
            observations,
        })
    }

    pub fn empty(group_columns: Vec<String>) -> Result<Self, AppError> {
        Self::new(group_columns, Vec::new())
    }

    pub fn group_columns(&self) -> &[String] {
        &self.group_columns
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn into_observations(self) -> Vec<Observation> {
        self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn group_index(&self, column: &str) -> Option<usize> {
        self.group_columns.iter().position(|c| c == column)
    }

    /// Distinct metric names in first-seen order.
    pub fn metrics(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.observations
            .iter()
            .filter(|o| seen.insert(o.metric.as_str()))
            .map(|o| o.metric.clone())
            .collect()
    }

    /// Keep observations matching `pred`, preserving order.
    pub fn filtered<F>(&self, pred: F) -> Self
    where
        F: Fn(&Observation) -> bool,
    {
        Self {
            group_columns: self.group_columns.clone(),
            observations: self.observations.iter().filter(|o| pred(o)).cloned().collect(),
        }
    }
}

/// Behaviour of `Store::write` when the target table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// Refuse to touch an existing table.
    FailIfExists,
    Append,
    /// Drop and recreate the table.
    Replace,
}

/// Declared storage type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    /// Integer years or ISO date text.
    Numeric,
}

impl ColumnType {
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Numeric => "NUMERIC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(group: &[&str], ts: Option<Timestamp>, value: Option<f64>) -> Observation {
        Observation {
            group: group.iter().map(|g| Some(g.to_string())).collect(),
            timestamp: ts,
            metric: "yield".to_string(),
            value,
        }
    }

    #[test]
    fn dataset_rejects_misaligned_group_values() {
        let err = CanonicalDataset::new(
            vec!["area".to_string(), "item".to_string()],
            vec![obs(&["Kenya"], Some(Timestamp::Year(2020)), Some(1.0))],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::SchemaMismatch(_)));
    }

    #[test]
    fn dataset_rejects_reserved_group_columns() {
        let err = CanonicalDataset::empty(vec!["value".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::SchemaMismatch(_)));
    }

    #[test]
    fn group_column_names_compare_without_case() {
        for reserved in ["Value", "TIMESTAMP", "Metric"] {
            let err = CanonicalDataset::empty(vec![reserved.to_string()]).unwrap_err();
            assert!(matches!(err, AppError::SchemaMismatch(_)), "{reserved} accepted");
        }
        let err = CanonicalDataset::empty(vec!["area".to_string(), "Area".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::SchemaMismatch(msg) if msg.contains("Duplicate")));
    }

    #[test]
    fn years_sort_before_dates() {
        let d = NaiveDate::from_ymd_opt(1999, 1, 1).unwrap();
        assert!(Timestamp::Year(2030) < Timestamp::Date(d));
        assert!(Timestamp::Year(2020) < Timestamp::Year(2021));
        assert_eq!(Timestamp::Date(d).year(), 1999);
        assert_eq!(Timestamp::Date(d).to_string(), "1999-01-01");
    }

    #[test]
    fn metrics_are_listed_in_first_seen_order() {
        let mut a = obs(&["Kenya"], Some(Timestamp::Year(2020)), Some(1.0));
        a.metric = "price".to_string();
        let b = obs(&["Kenya"], Some(Timestamp::Year(2020)), Some(1.0));
        let ds = CanonicalDataset::new(vec!["area".to_string()], vec![a.clone(), b, a]).unwrap();
        assert_eq!(ds.metrics(), vec!["price".to_string(), "yield".to_string()]);
    }
}

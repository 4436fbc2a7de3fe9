//! Schema normalization: raw tables to the canonical long format.
//!
//! Structural problems (absent declared columns) are errors. Cell-level
//! problems are not: a timestamp or value that fails to parse becomes null
//! and is dealt with by the missing-value policy downstream.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::data::raw::{RawTable, normalize_header_name};
use crate::domain::{CanonicalDataset, Observation, Timestamp};
use crate::error::AppError;
use crate::reconcile::dedup_prefer_last;

/// How to interpret the source timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    Year,
    Date,
}

/// Where the metric name of each row comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricSource {
    /// Every row carries the same metric.
    Fixed(String),
    /// Read the metric name from a source column (e.g. FAOSTAT `element`).
    Column(String),
}

/// Declared mapping from a source's columns onto the canonical schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub timestamp: String,
    pub timestamp_kind: TimestampKind,
    pub value: String,
    /// `(source column, canonical group column)` pairs, in key order.
    pub groups: Vec<(String, String)>,
    pub metric: MetricSource,
}

impl ColumnMap {
    /// Every source column this map reads.
    pub fn source_columns(&self) -> Vec<String> {
        let mut cols = vec![self.timestamp.clone()];
        cols.extend(self.groups.iter().map(|(src, _)| src.clone()));
        if let MetricSource::Column(c) = &self.metric {
            cols.push(c.clone());
        }
        cols.push(self.value.clone());
        cols.into_iter().map(|c| normalize_header_name(&c)).collect()
    }

    pub fn canonical_groups(&self) -> Vec<String> {
        self.groups.iter().map(|(_, canonical)| canonical.clone()).collect()
    }
}

/// Map `raw` onto the canonical schema described by `map`.
pub fn normalize(raw: &RawTable, map: &ColumnMap) -> Result<CanonicalDataset, AppError> {
    let header_map: HashMap<&str, usize> = raw.header_map();
    let wanted = map.source_columns();

    let missing: Vec<String> = wanted
        .iter()
        .filter(|c| !header_map.contains_key(c.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(AppError::MissingColumns(missing));
    }

    let idx = |name: &str| header_map[normalize_header_name(name).as_str()];
    let ts_idx = idx(&map.timestamp);
    let value_idx = idx(&map.value);
    let group_idx: Vec<usize> = map.groups.iter().map(|(src, _)| idx(src)).collect();
    let (fixed_metric, metric_idx) = match &map.metric {
        MetricSource::Fixed(name) => (Some(name.as_str()), None),
        MetricSource::Column(c) => (None, Some(idx(c))),
    };

    let mut observations = Vec::with_capacity(raw.len());
    let mut coerced_nulls = 0usize;

    for row in &raw.rows {
        let get = move |i: usize| row.get(i).and_then(|c| c.as_deref());

        let metric = match (fixed_metric, metric_idx.and_then(|i| get(i))) {
            (Some(name), _) => name.to_string(),
            (None, Some(m)) => m.to_string(),
            // A row without a metric name cannot be placed anywhere.
            (None, None) => continue,
        };

        let raw_ts = get(ts_idx);
        let timestamp = raw_ts.and_then(|s| parse_timestamp(s, map.timestamp_kind));
        let raw_value = get(value_idx);
        let value = raw_value.and_then(parse_number);

        if (raw_ts.is_some() && timestamp.is_none()) || (raw_value.is_some() && value.is_none()) {
            coerced_nulls += 1;
        }

        observations.push(Observation {
            group: group_idx.iter().map(|&i| get(i).map(str::to_string)).collect(),
            timestamp,
            metric,
            value,
        });
    }

    let (observations, duplicates) = dedup_prefer_last(observations);
    debug!(
        rows = raw.len(),
        kept = observations.len(),
        coerced_nulls,
        duplicates,
        "normalized raw table"
    );

    CanonicalDataset::new(map.canonical_groups(), observations)
}

/// Parse a timestamp cell; `None` on failure.
pub fn parse_timestamp(s: &str, kind: TimestampKind) -> Option<Timestamp> {
    match kind {
        TimestampKind::Year => parse_year(s).map(Timestamp::Year),
        TimestampKind::Date => parse_date(s).map(Timestamp::Date),
    }
}

/// Accepts `2020` and `2020.0`; rejects fractional or out-of-range years.
pub fn parse_year(s: &str) -> Option<i32> {
    let s = s.trim();
    if let Ok(y) = s.parse::<i32>() {
        return Some(y);
    }
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() && v.fract() == 0.0 && v.abs() <= i32::MAX as f64 {
        Some(v as i32)
    } else {
        None
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    let s = s.trim();
    // Datetime strings ("2024-01-05 00:00:00") keep only the date part.
    let s = s.split([' ', 'T']).next().unwrap_or(s);
    FMTS.iter().find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse a finite number, tolerating thousands separators.
pub fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    let v = cleaned.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::raw::cell;
    use rstest::rstest;
    use std::collections::HashSet;

    fn faostat_map() -> ColumnMap {
        ColumnMap {
            timestamp: "year".to_string(),
            timestamp_kind: TimestampKind::Year,
            value: "value".to_string(),
            groups: vec![
                ("area".to_string(), "area".to_string()),
                ("item".to_string(), "item".to_string()),
            ],
            metric: MetricSource::Column("element".to_string()),
        }
    }

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        let mut table = RawTable::new(headers.iter().map(|h| h.to_string()).collect());
        for r in rows {
            table.push_row(r.iter().map(|c| cell(c)).collect());
        }
        table
    }

    #[rstest]
    #[case("2020", Some(2020))]
    #[case("2020.0", Some(2020))]
    #[case(" 1999 ", Some(1999))]
    #[case("2020.5", None)]
    #[case("n/a", None)]
    fn year_coercion(#[case] input: &str, #[case] expected: Option<i32>) {
        assert_eq!(parse_year(input), expected);
    }

    #[rstest]
    #[case("1,234.5", Some(1234.5))]
    #[case("45", Some(45.0))]
    #[case("NaN", None)]
    #[case("inf", None)]
    #[case("-", None)]
    fn number_coercion(#[case] input: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_number(input), expected);
    }

    #[test]
    fn dates_accept_common_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_date("2024-03-05"), Some(d));
        assert_eq!(parse_date("05/03/2024"), Some(d));
        assert_eq!(parse_date("2024-03-05 00:00:00"), Some(d));
        assert_eq!(parse_date("March 5"), None);
    }

    #[test]
    fn selects_renames_and_coerces() {
        let table = raw(
            &["Year", "Area", "Item", "Element", "Value", "Flag"],
            &[
                &["2020", "Kenya", "Maize", "Yield", "1.8", "E"],
                &["2021", "Kenya", "Maize", "Yield", "bad", "E"],
                &["oops", "Kenya", "Maize", "Yield", "2.0", "E"],
            ],
        );
        let ds = normalize(&table, &faostat_map()).unwrap();
        assert_eq!(ds.group_columns(), &["area".to_string(), "item".to_string()]);
        assert_eq!(ds.len(), 3);

        let obs = ds.observations();
        assert_eq!(obs[0].timestamp, Some(Timestamp::Year(2020)));
        assert_eq!(obs[0].metric, "Yield");
        assert_eq!(obs[0].value, Some(1.8));
        assert_eq!(obs[1].value, None);
        assert_eq!(obs[2].timestamp, None);
    }

    #[test]
    fn missing_declared_columns_are_reported_together() {
        let table = raw(&["year", "area"], &[&["2020", "Kenya"]]);
        match normalize(&table, &faostat_map()).unwrap_err() {
            AppError::MissingColumns(cols) => assert_eq!(cols, vec!["item", "element", "value"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn output_has_unique_keys_and_later_rows_win() {
        let table = raw(
            &["year", "area", "item", "element", "value"],
            &[
                &["2020", "Kenya", "Maize", "Yield", "1.0"],
                &["2020.0", "Kenya", "Maize", "Yield", "1.5"],
                &["2021", "Kenya", "Maize", "Yield", "2.0"],
            ],
        );
        let ds = normalize(&table, &faostat_map()).unwrap();
        let keys: HashSet<_> = ds.observations().iter().map(|o| o.key()).collect();
        assert_eq!(keys.len(), ds.len());
        assert_eq!(ds.len(), 2);
        let y2020 = ds
            .observations()
            .iter()
            .find(|o| o.timestamp == Some(Timestamp::Year(2020)))
            .unwrap();
        assert_eq!(y2020.value, Some(1.5));
    }
}

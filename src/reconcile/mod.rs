//! Dataset reconciliation: merge same-shaped datasets into one ordered series.
//!
//! Conflict policy is prefer-last: when two inputs carry the same
//! `(entity_key, timestamp, metric)`, the observation from the later input
//! (or the later row within one input) wins. Sorting is stable, so rows with
//! equal sort keys keep their relative input order.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::domain::{CanonicalDataset, Observation};
use crate::error::AppError;

/// Drop earlier duplicates of each observation key.
///
/// Survivors keep their own (later) position. Returns the number dropped.
pub fn dedup_prefer_last(observations: Vec<Observation>) -> (Vec<Observation>, usize) {
    let total = observations.len();
    let mut seen = HashSet::with_capacity(total);
    let mut kept: Vec<Observation> = observations
        .into_iter()
        .rev()
        .filter(|o| seen.insert(o.key()))
        .collect();
    kept.reverse();
    let dropped = total - kept.len();
    (kept, dropped)
}

/// Concatenate `datasets`, resolve duplicates and sort by `sort_keys` then timestamp.
///
/// Every sort key must be one of the (shared) group columns.
pub fn merge(datasets: &[CanonicalDataset], sort_keys: &[&str]) -> Result<CanonicalDataset, AppError> {
    let Some(first) = datasets.first() else {
        return Err(AppError::EmptyResult("No datasets to merge.".to_string()));
    };
    let group_columns = first.group_columns().to_vec();

    for (i, ds) in datasets.iter().enumerate().skip(1) {
        if ds.group_columns() != group_columns.as_slice() {
            return Err(AppError::SchemaMismatch(format!(
                "Dataset {i} has group columns [{}], expected [{}].",
                ds.group_columns().join(", "),
                group_columns.join(", ")
            )));
        }
    }

    let missing: Vec<String> = sort_keys
        .iter()
        .filter(|k| first.group_index(k).is_none())
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AppError::MissingColumns(missing));
    }
    let key_idx: Vec<usize> = sort_keys.iter().filter_map(|k| first.group_index(k)).collect();

    let combined: Vec<Observation> = datasets
        .iter()
        .flat_map(|ds| ds.observations().iter().cloned())
        .collect();
    let input_rows = combined.len();

    let (mut merged, conflicts) = dedup_prefer_last(combined);
    merged.sort_by(|a, b| {
        let ka = key_idx.iter().map(|&i| &a.group[i]);
        let kb = key_idx.iter().map(|&i| &b.group[i]);
        ka.cmp(kb).then_with(|| a.timestamp.cmp(&b.timestamp))
    });

    if conflicts > 0 {
        info!(conflicts, "resolved duplicate observations (later source wins)");
    }
    debug!(inputs = datasets.len(), input_rows, output_rows = merged.len(), "merged datasets");

    CanonicalDataset::new(group_columns, merged)
}

/// Merge sorting by every group column.
pub fn merge_by_group(datasets: &[CanonicalDataset]) -> Result<CanonicalDataset, AppError> {
    let Some(first) = datasets.first() else {
        return Err(AppError::EmptyResult("No datasets to merge.".to_string()));
    };
    let keys: Vec<String> = first.group_columns().to_vec();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    merge(datasets, &key_refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;
    use chrono::NaiveDate;

    fn day(d: u32) -> Option<Timestamp> {
        Some(Timestamp::Date(NaiveDate::from_ymd_opt(2024, 1, d).unwrap()))
    }

    fn price(county: &str, ts: Option<Timestamp>, value: f64) -> Observation {
        Observation {
            group: vec![Some(county.to_string())],
            timestamp: ts,
            metric: "price".to_string(),
            value: Some(value),
        }
    }

    fn dataset(obs: Vec<Observation>) -> CanonicalDataset {
        CanonicalDataset::new(vec!["county".to_string()], obs).unwrap()
    }

    #[test]
    fn output_is_sorted_by_group_then_timestamp() {
        let a = dataset(vec![price("Nakuru", day(2), 30.0), price("Nairobi", day(3), 40.0)]);
        let b = dataset(vec![price("Nairobi", day(1), 41.0), price("Nakuru", day(1), 29.0)]);
        let merged = merge(&[a, b], &["county"]).unwrap();

        let order: Vec<(String, Option<Timestamp>)> = merged
            .observations()
            .iter()
            .map(|o| (o.group[0].clone().unwrap(), o.timestamp))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Nairobi".to_string(), day(1)),
                ("Nairobi".to_string(), day(3)),
                ("Nakuru".to_string(), day(1)),
                ("Nakuru".to_string(), day(2)),
            ]
        );
    }

    #[test]
    fn conflicts_prefer_the_later_source() {
        let kamis = dataset(vec![price("Nairobi", day(1), 40.0)]);
        let agribora = dataset(vec![price("Nairobi", day(1), 42.0), price("Nairobi", day(2), 43.0)]);
        let merged = merge(&[kamis, agribora], &["county"]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.observations()[0].value, Some(42.0));
    }

    #[test]
    fn non_duplicates_are_never_dropped() {
        let mut other_metric = price("Nairobi", day(1), 900.0);
        other_metric.metric = "volume".to_string();
        let a = dataset(vec![price("Nairobi", day(1), 40.0), other_metric]);
        let b = dataset(vec![price("Nairobi", None, 1.0)]);
        let merged = merge(&[a, b], &["county"]).unwrap();
        assert_eq!(merged.len(), 3);
        // Null timestamps sort first.
        assert_eq!(merged.observations()[0].timestamp, None);
    }

    #[test]
    fn equal_sort_keys_keep_input_order() {
        let mut volume = price("Nairobi", day(1), 900.0);
        volume.metric = "volume".to_string();
        let a = dataset(vec![volume.clone()]);
        let b = dataset(vec![price("Nairobi", day(1), 40.0)]);
        let merged = merge(&[a, b], &["county"]).unwrap();
        assert_eq!(merged.observations()[0].metric, "volume");
        assert_eq!(merged.observations()[1].metric, "price");
    }

    #[test]
    fn merge_is_idempotent() {
        let a = dataset(vec![price("Nakuru", day(2), 30.0), price("Nairobi", day(3), 40.0)]);
        let b = dataset(vec![price("Nairobi", day(3), 41.0), price("Eldoret", day(1), 25.0)]);
        let once = merge(&[a, b], &["county"]).unwrap();
        let twice = merge(std::slice::from_ref(&once), &["county"]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn mismatched_group_columns_are_rejected() {
        let a = dataset(vec![price("Nairobi", day(1), 40.0)]);
        let b = CanonicalDataset::new(vec!["market".to_string()], vec![price("Wakulima", day(1), 40.0)]).unwrap();
        assert!(matches!(merge(&[a, b], &["county"]), Err(AppError::SchemaMismatch(_))));
    }

    #[test]
    fn unknown_sort_key_is_missing_column() {
        let a = dataset(vec![price("Nairobi", day(1), 40.0)]);
        match merge(&[a], &["market"]).unwrap_err() {
            AppError::MissingColumns(cols) => assert_eq!(cols, vec!["market".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

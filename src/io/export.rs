//! CSV caches for raw fetches and canonical datasets.
//!
//! These files are advisory (reproducibility, inspection in a spreadsheet);
//! the SQLite store stays the authoritative copy.

use std::fs::create_dir_all;
use std::path::Path;

use crate::data::raw::RawTable;
use crate::domain::{CanonicalDataset, METRIC_COLUMN, TIMESTAMP_COLUMN, VALUE_COLUMN};
use crate::error::AppError;

/// Write a raw table exactly as fetched.
pub fn write_raw_csv(path: &Path, table: &RawTable) -> Result<(), AppError> {
    let mut writer = open_writer(path)?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::Io(format!("Failed to flush '{}': {e}", path.display())))
}

/// Write a canonical dataset as `group..., timestamp, metric, value`.
pub fn write_canonical_csv(path: &Path, dataset: &CanonicalDataset) -> Result<(), AppError> {
    let mut writer = open_writer(path)?;

    let mut header: Vec<&str> = dataset.group_columns().iter().map(String::as_str).collect();
    header.extend([TIMESTAMP_COLUMN, METRIC_COLUMN, VALUE_COLUMN]);
    writer.write_record(&header)?;

    for obs in dataset.observations() {
        let mut record: Vec<String> = obs.group.iter().map(|g| g.clone().unwrap_or_default()).collect();
        record.push(obs.timestamp.map(|t| t.to_string()).unwrap_or_default());
        record.push(obs.metric.clone());
        record.push(obs.value.map(|v| v.to_string()).unwrap_or_default());
        writer.write_record(&record)?;
    }

    writer
        .flush()
        .map_err(|e| AppError::Io(format!("Failed to flush '{}': {e}", path.display())))
}

fn open_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)
            .map_err(|e| AppError::Io(format!("Failed to create '{}': {e}", parent.display())))?;
    }
    csv::Writer::from_path(path)
        .map_err(|e| AppError::Io(format!("Failed to create CSV '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observation, Timestamp};

    #[test]
    fn canonical_csv_has_header_and_blank_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prices.csv");
        let ds = CanonicalDataset::new(
            vec!["county".to_string()],
            vec![Observation {
                group: vec![Some("Nairobi, Central".to_string())],
                timestamp: Some(Timestamp::Year(2021)),
                metric: "price".to_string(),
                value: None,
            }],
        )
        .unwrap();

        write_canonical_csv(&path, &ds).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "county,timestamp,metric,value\n\"Nairobi, Central\",2021,price,\n");
    }
}

//! CSV file adapter.
//!
//! Reads a market-feed or bulk-download CSV into a `RawTable`. A missing file
//! is an error (never an empty table): the caller has to run ingestion first.

use std::fs::File;
use std::path::Path;

use tracing::{debug, warn};

use crate::data::raw::{RawTable, cell};
use crate::error::AppError;

/// Load a CSV file, requiring the given (case-insensitive) columns.
pub fn load_csv(path: &Path, required: &[&str]) -> Result<RawTable, AppError> {
    if !path.exists() {
        return Err(AppError::NotFound(format!(
            "'{}' not found. Download or collect the data first (run ingestion before training).",
            path.display()
        )));
    }

    let file = File::open(path)
        .map_err(|e| AppError::Io(format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::SchemaMismatch(format!("Failed to read CSV headers of '{}': {e}", path.display())))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut table = RawTable::new(headers);

    let missing = table.missing_columns(required);
    if !missing.is_empty() {
        return Err(AppError::SchemaMismatch(format!(
            "CSV '{}' is missing required columns: {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let mut skipped = 0usize;
    for (idx, result) in reader.records().enumerate() {
        match result {
            Ok(record) => table.push_row(record.iter().map(cell).collect()),
            Err(e) => {
                // +2: records start after the header and lines are 1-based.
                debug!(line = idx + 2, error = %e, "skipping unparseable CSV record");
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped unparseable CSV records");
    }
    debug!(path = %path.display(), rows = table.len(), "loaded CSV");

    Ok(table)
}

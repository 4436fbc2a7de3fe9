//! Plain-text terminal output for each command.
//!
//! Formatting lives here so the pipelines only return data.

use std::fmt::Write;

use crate::app::pipeline::{CollectOutcome, EvalOutcome, ImportOutcome, PredictOutcome, TrainOutcome};
use crate::domain::CanonicalDataset;

pub fn format_collect(outcome: &CollectOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== agri collect ===");
    let _ = writeln!(out, "Fetched: {} records", outcome.fetched_rows);
    let _ = writeln!(out, "Table: {} ({} rows written)", outcome.table, outcome.rows_written);
    if let Some(path) = &outcome.cache_path {
        let _ = writeln!(out, "Raw cache: {}", path.display());
    }
    out
}

pub fn format_import(outcome: &ImportOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== agri import ===");
    for (source, n) in &outcome.loaded {
        let _ = writeln!(out, "  {:<12} {n:>8} observations", source.name());
    }
    let _ = writeln!(out, "Reconciled: {} observations", outcome.merged_rows);
    let _ = writeln!(out, "Table: {} ({} rows written)", outcome.table, outcome.rows_written);
    let _ = writeln!(out, "Canonical cache: {}", outcome.cache_path.display());
    out
}

pub fn format_train(outcome: &TrainOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== agri train ===");
    let _ = writeln!(out, "Target: {}", outcome.target);
    let _ = writeln!(out, "Rows: train={} | test={}", outcome.n_train, outcome.n_test);
    let _ = writeln!(out, "Features ({}): {}", outcome.columns.len(), outcome.columns.join(", "));
    let _ = writeln!(out, "Train RMSE: {:.4}", outcome.train_rmse);
    let _ = writeln!(out, "Test RMSE: {:.4} | Test R2: {:.4}", outcome.test_rmse, outcome.test_r2);
    let _ = writeln!(out, "Schema: {} ({})", outcome.schema_path.display(), short(&outcome.schema_fingerprint));
    let _ = writeln!(out, "Model: {}", outcome.model_path.display());
    out
}

pub fn format_eval(outcome: &EvalOutcome) -> String {
    format!(
        "=== agri evaluate ===\nTable: {} | target: {}\nn={} | RMSE: {:.4} | R2: {:.4}\n",
        outcome.table, outcome.target, outcome.n, outcome.rmse, outcome.r2
    )
}

pub fn format_prediction(outcome: &PredictOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Predicted {} for {}: {:.4}", outcome.target, outcome.key, outcome.prediction);
    for (column, level) in &outcome.report.unseen_levels {
        let _ = writeln!(out, "  note: {column}={level} was not seen in training");
    }
    for metric in &outcome.report.dropped_metrics {
        let _ = writeln!(out, "  note: feature `{metric}` is not used by the model");
    }
    out
}

/// Aligned table of the canonical columns.
pub fn format_preview(table: &str, dataset: &CanonicalDataset) -> String {
    let mut header: Vec<String> = dataset.group_columns().to_vec();
    header.extend(["timestamp", "metric", "value"].map(String::from));

    let rows: Vec<Vec<String>> = dataset
        .observations()
        .iter()
        .map(|o| {
            let mut row: Vec<String> = o.group.iter().map(|g| g.clone().unwrap_or_else(|| "-".to_string())).collect();
            row.push(o.timestamp.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()));
            row.push(o.metric.clone());
            row.push(o.value.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".to_string()));
            row
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|j| {
            rows.iter()
                .map(|r| r[j].chars().count())
                .chain(std::iter::once(header[j].chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "=== {table} ({} rows) ===", dataset.len());
    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let _ = writeln!(out, "{}", line(&header));
    for row in &rows {
        let _ = writeln!(out, "{}", line(row));
    }
    out
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

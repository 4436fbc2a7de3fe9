//! Command-line parsing for the `agri` pipeline.
//!
//! Argument parsing and dispatch stay separate from the pipeline code; flags
//! left unset fall back to `Settings`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::data::sources::Source;
use crate::domain::WriteMode;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "agri", version, about = "Crop yield and market price ingestion, storage and regression")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch FAOSTAT records and store them.
    Collect(CollectArgs),
    /// Load market price or bulk FAOSTAT CSVs, reconcile and store them.
    Import(ImportArgs),
    /// Fit the feature schema, scaler and model on a stored table.
    Train(TrainArgs),
    /// Score the saved model on a stored table.
    Evaluate(EvaluateArgs),
    /// Predict for one manually described row.
    Predict(PredictArgs),
    /// Print the first rows of a stored table.
    Show(ShowArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CollectArgs {
    /// FAOSTAT item (defaults to AGRI_CROP).
    #[arg(long)]
    pub crop: Option<String>,

    /// FAOSTAT area (defaults to AGRI_COUNTRY).
    #[arg(long)]
    pub country: Option<String>,

    #[arg(long, default_value = "Yield")]
    pub element: String,

    #[arg(long)]
    pub start_year: Option<i32>,

    #[arg(long)]
    pub end_year: Option<i32>,

    #[arg(long, default_value = "maize_yield")]
    pub table: String,

    #[arg(long, value_enum, default_value_t = WriteMode::FailIfExists)]
    pub mode: WriteMode,

    /// Do not keep a raw CSV copy of the response.
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    /// Source layout; repeat to reconcile several (later sources win conflicts).
    #[arg(long = "source", value_enum, required = true)]
    pub sources: Vec<Source>,

    /// File for the source at the same position (defaults from settings).
    #[arg(long = "path")]
    pub paths: Vec<PathBuf>,

    /// Value column of a bulk FAOSTAT CSV.
    #[arg(long, default_value = "Yield")]
    pub element: String,

    #[arg(long, default_value = "maize_prices")]
    pub table: String,

    #[arg(long, value_enum, default_value_t = WriteMode::FailIfExists)]
    pub mode: WriteMode,
}

#[derive(Debug, Args, Clone)]
pub struct TrainArgs {
    #[arg(long, default_value = "maize_yield")]
    pub table: String,

    /// Metric to predict; required when the table holds several.
    #[arg(long)]
    pub target: Option<String>,

    /// Add month and week-of-year features for dated series.
    #[arg(long)]
    pub temporal: bool,

    /// Metric to pass through log1p before imputation (repeatable).
    #[arg(long = "log-column")]
    pub log_columns: Vec<String>,

    /// Holdout fraction (defaults to AGRI_TEST_SIZE).
    #[arg(long)]
    pub test_size: Option<f64>,

    /// Split seed (defaults to AGRI_RANDOM_SEED).
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = "maize_yield")]
    pub table: String,
}

#[derive(Debug, Args, Clone)]
#[command(group(ArgGroup::new("when").required(true).args(["year", "date"])))]
pub struct PredictArgs {
    #[arg(long)]
    pub year: Option<i32>,

    /// Observation date (YYYY-MM-DD).
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Group value as `column=value` (repeatable).
    #[arg(long = "group", value_parser = parse_key_value)]
    pub groups: Vec<(String, String)>,

    /// Numeric feature as `metric=value` (repeatable).
    #[arg(long = "feature", value_parser = parse_feature)]
    pub features: Vec<(String, f64)>,
}

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    #[arg(long, default_value = "maize_yield")]
    pub table: String,

    #[arg(long, default_value_t = 5)]
    pub limit: usize,
}

/// Parse `key=value`; both sides trimmed and non-empty.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return Err(format!("expected key=value, got `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn parse_feature(s: &str) -> Result<(String, f64), String> {
    let (metric, value) = parse_key_value(s)?;
    let value: f64 = value
        .parse()
        .map_err(|e| format!("invalid number for `{metric}`: {e}"))?;
    if !value.is_finite() {
        return Err(format!("value for `{metric}` must be finite"));
    }
    Ok((metric, value))
}

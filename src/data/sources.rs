//! Known upstream layouts and how each maps onto the canonical schema.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::info;

use crate::config::Settings;
use crate::data::csv_source::load_csv;
use crate::domain::CanonicalDataset;
use crate::error::AppError;
use crate::normalize::{ColumnMap, MetricSource, TimestampKind, normalize};

/// Metric name used by both market price feeds.
pub const PRICE_METRIC: &str = "price";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// FAOSTAT API records (year, area, item, element, value).
    Faostat,
    /// FAOSTAT bulk download (`Year` plus one column per element).
    FaostatCsv,
    /// KAMIS market prices (date, county, market, commodity, wholesale).
    Kamis,
    /// Agribora market prices (date, county, market, commodity, price).
    Agribora,
}

impl Source {
    pub fn name(self) -> &'static str {
        match self {
            Source::Faostat => "faostat",
            Source::FaostatCsv => "faostat-csv",
            Source::Kamis => "kamis",
            Source::Agribora => "agribora",
        }
    }

    /// `element` only matters for the bulk FAOSTAT layout, where it names
    /// the value column.
    pub fn column_map(self, element: &str) -> ColumnMap {
        match self {
            Source::Faostat => ColumnMap {
                timestamp: "year".to_string(),
                timestamp_kind: TimestampKind::Year,
                value: "value".to_string(),
                groups: vec![
                    ("area".to_string(), "area".to_string()),
                    ("item".to_string(), "item".to_string()),
                ],
                metric: MetricSource::Column("element".to_string()),
            },
            Source::FaostatCsv => ColumnMap {
                timestamp: "year".to_string(),
                timestamp_kind: TimestampKind::Year,
                value: element.to_string(),
                groups: Vec::new(),
                metric: MetricSource::Fixed(element.to_string()),
            },
            Source::Kamis => price_map("wholesale"),
            Source::Agribora => price_map("price"),
        }
    }

    /// Group columns used to order reconciled output.
    pub fn sort_keys(self) -> &'static [&'static str] {
        match self {
            Source::Faostat => &["area", "item"],
            Source::FaostatCsv => &[],
            Source::Kamis | Source::Agribora => &["county", "market", "commodity"],
        }
    }

    /// Default file location for file-based sources.
    pub fn default_path(self, settings: &Settings) -> Option<PathBuf> {
        match self {
            Source::Faostat => None,
            Source::FaostatCsv => Some(settings.raw_dir.join(format!("{}.csv", settings.crop))),
            Source::Kamis => Some(settings.kamis_csv.clone()),
            Source::Agribora => Some(settings.agribora_csv.clone()),
        }
    }
}

fn price_map(value_column: &str) -> ColumnMap {
    ColumnMap {
        timestamp: "date".to_string(),
        timestamp_kind: TimestampKind::Date,
        value: value_column.to_string(),
        groups: vec![
            ("county".to_string(), "county".to_string()),
            ("market".to_string(), "market".to_string()),
            ("commodity".to_string(), "commodity".to_string()),
        ],
        metric: MetricSource::Fixed(PRICE_METRIC.to_string()),
    }
}

/// Load a CSV in `source`'s layout and normalize it.
pub fn load_source(source: Source, path: &Path, element: &str) -> Result<CanonicalDataset, AppError> {
    let map = source.column_map(element);
    let required = map.source_columns();
    let required: Vec<&str> = required.iter().map(String::as_str).collect();

    let raw = load_csv(path, &required)?;
    let dataset = normalize(&raw, &map)?;
    info!(
        source = source.name(),
        path = %path.display(),
        rows = raw.len(),
        observations = dataset.len(),
        "loaded source"
    );
    Ok(dataset)
}

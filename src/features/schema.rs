//! The frozen feature schema shared by training and inference.
//!
//! A schema is fitted once from training rows and serialized with the model.
//! Inference never re-derives columns from the data it is given; it reindexes
//! onto `columns`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Bumped whenever the meaning of a persisted schema changes.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Sentinel category for missing group values.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

pub const YEAR_COLUMN: &str = "year";
pub const MONTH_COLUMN: &str = "month";
pub const WEEK_COLUMN: &str = "week_of_year";

/// Drop-first one-hot encoding of one group column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalEncoding {
    pub column: String,
    /// Level without an indicator column.
    pub reference: String,
    /// Levels with an indicator column, sorted.
    pub levels: Vec<String>,
}

impl CategoricalEncoding {
    pub fn indicator_name(&self, level: &str) -> String {
        format!("{}_{}", self.column, level)
    }

    pub fn indicator_names(&self) -> Vec<String> {
        self.levels.iter().map(|l| self.indicator_name(l)).collect()
    }
}

/// A non-target metric used as a numeric feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericFeature {
    pub metric: String,
    pub column: String,
    /// Apply `ln(1 + x)` before imputation.
    pub log: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub target_metric: String,
    pub group_columns: Vec<String>,
    pub categoricals: Vec<CategoricalEncoding>,
    pub numeric: Vec<NumericFeature>,
    /// Whether `month` / `week_of_year` are part of the matrix.
    pub temporal: bool,
    /// Training medians for every non-indicator column.
    pub medians: BTreeMap<String, f64>,
    /// Ordered model input columns.
    pub columns: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema and stamp its fingerprint.
    pub fn new(
        target_metric: String,
        group_columns: Vec<String>,
        categoricals: Vec<CategoricalEncoding>,
        numeric: Vec<NumericFeature>,
        temporal: bool,
        medians: BTreeMap<String, f64>,
        columns: Vec<String>,
    ) -> Result<Self, AppError> {
        let mut schema = Self {
            version: FEATURE_SCHEMA_VERSION,
            fingerprint: String::new(),
            target_metric,
            group_columns,
            categoricals,
            numeric,
            temporal,
            medians,
            columns,
        };
        schema.fingerprint = schema.compute_fingerprint()?;
        Ok(schema)
    }

    /// SHA-256 over the schema contents (fingerprint field excluded).
    pub fn compute_fingerprint(&self) -> Result<String, AppError> {
        let unstamped = Self {
            fingerprint: String::new(),
            ..self.clone()
        };
        let bytes = serde_json::to_vec(&unstamped)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }

    /// Check version and fingerprint of a loaded schema.
    pub fn verify(&self) -> Result<(), AppError> {
        if self.version != FEATURE_SCHEMA_VERSION {
            return Err(AppError::FeatureSchemaMismatch(format!(
                "Schema version {} is not supported (expected {FEATURE_SCHEMA_VERSION}); retrain the model.",
                self.version
            )));
        }
        let actual = self.compute_fingerprint()?;
        if actual != self.fingerprint {
            return Err(AppError::FeatureSchemaMismatch(format!(
                "Schema fingerprint {} does not match its contents ({actual}).",
                self.fingerprint
            )));
        }
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// Feature columns produced through `log1p`.
    pub fn log_columns(&self) -> Vec<&str> {
        self.numeric
            .iter()
            .filter(|f| f.log)
            .map(|f| f.column.as_str())
            .collect()
    }

    pub fn is_indicator(&self, column: &str) -> bool {
        self.categoricals
            .iter()
            .any(|c| c.levels.iter().any(|l| c.indicator_name(l) == column))
    }
}

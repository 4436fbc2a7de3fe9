//! Canonical long-format data to model-ready feature matrices.
//!
//! Training fits a [`FeatureSchema`]: the ordered column list, the one-hot
//! encodings and the imputation medians. Inference only ever reindexes onto
//! that schema, so a model always sees exactly the columns it was fitted on.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{CanonicalDataset, Timestamp};
use crate::error::AppError;
use crate::features::impute::{fill_category, fill_numeric, fit_median, log1p};
use crate::features::schema::{
    CategoricalEncoding, FeatureSchema, MONTH_COLUMN, NumericFeature, UNKNOWN_CATEGORY, WEEK_COLUMN,
    YEAR_COLUMN,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureConfig {
    /// Label metric; may be omitted when the dataset holds a single metric.
    pub target_metric: Option<String>,
    /// Derive `month` / `week_of_year` from date timestamps.
    pub temporal: bool,
    /// Metrics (by name or feature column name) to pass through `log1p`.
    pub log_columns: Vec<String>,
}

/// Identity of one wide row: entity key plus timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub group: Vec<Option<String>>,
    pub timestamp: Timestamp,
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group: Vec<&str> = self.group.iter().map(|g| g.as_deref().unwrap_or("-")).collect();
        if group.is_empty() {
            write!(f, "{}", self.timestamp)
        } else {
            write!(f, "{} @ {}", group.join("/"), self.timestamp)
        }
    }
}

/// Dense feature matrix with named columns and one key per row.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub keys: Vec<RowKey>,
    pub values: DMatrix<f64>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let j = self.columns.iter().position(|c| c == name)?;
        Some(self.values.column(j).iter().copied().collect())
    }
}

#[derive(Debug, Clone)]
pub struct TrainingFeatures {
    pub matrix: FeatureMatrix,
    pub target: DVector<f64>,
    pub schema: FeatureSchema,
}

/// What inference had to drop or fill to match the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceReport {
    /// `(group column, level)` pairs never seen in training.
    pub unseen_levels: Vec<(String, String)>,
    /// Metrics in the input that the schema has no column for.
    pub dropped_metrics: Vec<String>,
    /// Schema numeric columns with no value at all in the input.
    pub absent_columns: Vec<String>,
}

struct WideRow {
    key: RowKey,
    metrics: HashMap<String, Option<f64>>,
}

/// Pick the label metric: the requested one, or the only metric present.
pub fn resolve_target(dataset: &CanonicalDataset, requested: Option<&str>) -> Result<String, AppError> {
    let metrics = dataset.metrics();
    match requested {
        Some(target) if metrics.iter().any(|m| m == target) => Ok(target.to_string()),
        Some(target) => Err(AppError::SchemaMismatch(format!(
            "Target metric `{target}` is not present (available: {}).",
            metrics.join(", ")
        ))),
        None => match metrics.as_slice() {
            [] => Err(AppError::EmptyResult("Dataset has no observations.".to_string())),
            [only] => Ok(only.clone()),
            _ => Err(AppError::Config(format!(
                "Dataset holds several metrics ({}); choose one with --target.",
                metrics.join(", ")
            ))),
        },
    }
}

/// Lowercase, alphanumeric-and-underscore form of a metric name.
pub fn feature_column_name(metric: &str) -> String {
    let mut out = String::with_capacity(metric.len());
    for ch in metric.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "metric".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn build_training_features(
    dataset: &CanonicalDataset,
    config: &FeatureConfig,
) -> Result<TrainingFeatures, AppError> {
    let target_metric = resolve_target(dataset, config.target_metric.as_deref())?;
    let rows = pivot(dataset);

    let mut labelled: Vec<&WideRow> = Vec::with_capacity(rows.len());
    let mut target = Vec::with_capacity(rows.len());
    for row in &rows {
        if let Some(Some(y)) = row.metrics.get(&target_metric) {
            if y.is_finite() {
                labelled.push(row);
                target.push(*y);
            }
        }
    }
    if labelled.is_empty() {
        return Err(AppError::EmptyResult(format!(
            "No rows with a timestamp and a `{target_metric}` value."
        )));
    }
    debug!(
        rows = rows.len(),
        labelled = labelled.len(),
        target = %target_metric,
        "pivoted training rows"
    );

    let numeric = plan_numeric(dataset, &target_metric, &config.log_columns);
    let categoricals = plan_categoricals(dataset.group_columns(), &labelled);
    let temporal = config.temporal && labelled.iter().any(|r| r.key.timestamp.is_date());
    if config.temporal && !temporal {
        debug!("temporal features requested but timestamps are years only");
    }

    let mut medians = BTreeMap::new();
    let mut named: Vec<(String, Vec<f64>)> = Vec::new();
    for (name, values) in dense_columns(&labelled, &numeric, temporal) {
        let median = fit_median(&values);
        named.push((name.clone(), fill_numeric(&values, median)));
        medians.insert(name, median);
    }
    let (indicators, _) = indicator_columns(&labelled, &categoricals);
    named.extend(indicators);

    let columns: Vec<String> = named.iter().map(|(name, _)| name.clone()).collect();
    let mut seen = HashSet::new();
    if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
        return Err(AppError::SchemaMismatch(format!(
            "Feature column `{dup}` is produced twice; rename the metric or group level."
        )));
    }

    let values = DMatrix::from_fn(labelled.len(), named.len(), |i, j| named[j].1[i]);
    let keys = labelled.iter().map(|r| r.key.clone()).collect();

    let schema = FeatureSchema::new(
        target_metric,
        dataset.group_columns().to_vec(),
        categoricals,
        numeric,
        temporal,
        medians,
        columns.clone(),
    )?;

    Ok(TrainingFeatures {
        matrix: FeatureMatrix { columns, keys, values },
        target: DVector::from_vec(target),
        schema,
    })
}

pub fn build_inference_features(
    dataset: &CanonicalDataset,
    schema: &FeatureSchema,
) -> Result<FeatureMatrix, AppError> {
    build_inference_features_with_report(dataset, schema).map(|(matrix, _)| matrix)
}

/// Reindex `dataset` onto `schema.columns`; unseen levels and unknown metrics
/// are dropped, absent columns are filled from the stored medians (or zero).
pub fn build_inference_features_with_report(
    dataset: &CanonicalDataset,
    schema: &FeatureSchema,
) -> Result<(FeatureMatrix, InferenceReport), AppError> {
    check_groups(dataset, schema)?;
    let rows = pivot(dataset);
    if rows.is_empty() {
        return Err(AppError::EmptyResult(
            "No rows with a timestamp to predict for.".to_string(),
        ));
    }
    let rows: Vec<&WideRow> = rows.iter().collect();
    let (matrix, report) = reindex(&rows, schema);
    Ok((matrix, report))
}

/// Inference features plus the observed target, for rows that have one.
pub fn build_labelled_features(
    dataset: &CanonicalDataset,
    schema: &FeatureSchema,
) -> Result<(FeatureMatrix, DVector<f64>), AppError> {
    check_groups(dataset, schema)?;
    let rows = pivot(dataset);
    let mut labelled = Vec::with_capacity(rows.len());
    let mut target = Vec::with_capacity(rows.len());
    for row in &rows {
        if let Some(Some(y)) = row.metrics.get(&schema.target_metric) {
            if y.is_finite() {
                labelled.push(row);
                target.push(*y);
            }
        }
    }
    if labelled.is_empty() {
        return Err(AppError::EmptyResult(format!(
            "No rows with a `{}` value to evaluate against.",
            schema.target_metric
        )));
    }
    let (matrix, _) = reindex(&labelled, schema);
    Ok((matrix, DVector::from_vec(target)))
}

fn check_groups(dataset: &CanonicalDataset, schema: &FeatureSchema) -> Result<(), AppError> {
    schema.verify()?;
    if dataset.group_columns() != schema.group_columns.as_slice() {
        return Err(AppError::FeatureSchemaMismatch(format!(
            "Input group columns [{}] differ from the trained [{}].",
            dataset.group_columns().join(", "),
            schema.group_columns.join(", ")
        )));
    }
    Ok(())
}

fn reindex(rows: &[&WideRow], schema: &FeatureSchema) -> (FeatureMatrix, InferenceReport) {
    let mut report = InferenceReport::default();

    let known: HashSet<&str> = std::iter::once(schema.target_metric.as_str())
        .chain(schema.numeric.iter().map(|f| f.metric.as_str()))
        .collect();
    let dropped: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.metrics.keys())
        .map(String::as_str)
        .filter(|m| !known.contains(m))
        .collect();
    report.dropped_metrics = dropped.into_iter().map(str::to_string).collect();

    let mut computed: HashMap<String, Vec<f64>> = HashMap::new();
    for (name, values) in dense_columns(rows, &schema.numeric, schema.temporal) {
        if schema.numeric.iter().any(|f| f.column == name) && values.iter().all(Option::is_none) {
            report.absent_columns.push(name.clone());
        }
        let fill = schema.medians.get(&name).copied().unwrap_or(0.0);
        computed.insert(name.clone(), fill_numeric(&values, fill));
    }
    let (indicators, unseen) = indicator_columns(rows, &schema.categoricals);
    computed.extend(indicators);
    report.unseen_levels = unseen.into_iter().collect();

    let mut missing = Vec::new();
    let columns: Vec<Vec<f64>> = schema
        .columns
        .iter()
        .map(|name| match computed.remove(name) {
            Some(values) => values,
            None => {
                missing.push(name.clone());
                let fill = schema.medians.get(name).copied().unwrap_or(0.0);
                vec![fill; rows.len()]
            }
        })
        .collect();

    if !report.unseen_levels.is_empty() {
        let levels: Vec<String> = report
            .unseen_levels
            .iter()
            .map(|(col, level)| format!("{col}={level}"))
            .collect();
        warn!(levels = %levels.join(", "), "unseen categorical levels encoded as the reference level");
    }
    if !report.dropped_metrics.is_empty() {
        warn!(metrics = %report.dropped_metrics.join(", "), "dropping metrics absent from the feature schema");
    }
    if !report.absent_columns.is_empty() {
        debug!(columns = %report.absent_columns.join(", "), "numeric columns filled from training medians");
    }
    if !missing.is_empty() {
        warn!(columns = %missing.join(", "), "schema columns missing from input were filled");
    }

    let values = DMatrix::from_fn(rows.len(), columns.len(), |i, j| columns[j][i]);
    let matrix = FeatureMatrix {
        columns: schema.columns.clone(),
        keys: rows.iter().map(|r| r.key.clone()).collect(),
        values,
    };
    (matrix, report)
}

/// Long to wide on `(entity key, timestamp)`, first-seen row order. Rows
/// without a timestamp are skipped; a repeated metric keeps the later value.
fn pivot(dataset: &CanonicalDataset) -> Vec<WideRow> {
    let mut index: HashMap<RowKey, usize> = HashMap::new();
    let mut rows: Vec<WideRow> = Vec::new();
    let mut skipped = 0usize;

    for obs in dataset.observations() {
        let Some(timestamp) = obs.timestamp else {
            skipped += 1;
            continue;
        };
        let key = RowKey {
            group: obs.group.clone(),
            timestamp,
        };
        let idx = match index.get(&key) {
            Some(&idx) => idx,
            None => {
                index.insert(key.clone(), rows.len());
                rows.push(WideRow {
                    key,
                    metrics: HashMap::new(),
                });
                rows.len() - 1
            }
        };
        rows[idx].metrics.insert(obs.metric.clone(), obs.value);
    }

    if skipped > 0 {
        debug!(skipped, "observations without a timestamp left out of the pivot");
    }
    rows
}

fn plan_numeric(dataset: &CanonicalDataset, target: &str, log_columns: &[String]) -> Vec<NumericFeature> {
    let mut metrics: Vec<String> = dataset.metrics().into_iter().filter(|m| m != target).collect();
    metrics.sort();

    let mut used: HashSet<String> = [YEAR_COLUMN, MONTH_COLUMN, WEEK_COLUMN]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let mut matched_logs = HashSet::new();

    let features: Vec<NumericFeature> = metrics
        .into_iter()
        .map(|metric| {
            let base = feature_column_name(&metric);
            let log_spec = log_columns.iter().find(|c| **c == metric || **c == base);
            if let Some(requested) = log_spec {
                matched_logs.insert(requested.clone());
            }
            let stem = if log_spec.is_some() {
                format!("log_{base}")
            } else {
                base
            };
            let mut column = stem.clone();
            let mut n = 2;
            while !used.insert(column.clone()) {
                column = format!("{stem}_{n}");
                n += 1;
            }
            NumericFeature {
                metric,
                column,
                log: log_spec.is_some(),
            }
        })
        .collect();

    for requested in log_columns.iter().filter(|c| !matched_logs.contains(*c)) {
        warn!(column = %requested, "log transform requested for a metric that is not a feature");
    }
    features
}

fn plan_categoricals(group_columns: &[String], rows: &[&WideRow]) -> Vec<CategoricalEncoding> {
    group_columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let levels: BTreeSet<String> = rows
                .iter()
                .map(|r| fill_category(r.key.group.get(i).and_then(|g| g.as_deref())).to_string())
                .collect();
            let mut levels = levels.into_iter();
            let reference = levels.next().unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
            CategoricalEncoding {
                column: column.clone(),
                reference,
                levels: levels.collect(),
            }
        })
        .collect()
}

/// `year`, optional temporal columns, then numeric features; nulls kept.
fn dense_columns(
    rows: &[&WideRow],
    numeric: &[NumericFeature],
    temporal: bool,
) -> Vec<(String, Vec<Option<f64>>)> {
    let years: Vec<Option<f64>> = rows.iter().map(|r| Some(f64::from(r.key.timestamp.year()))).collect();
    let mut cols = vec![(YEAR_COLUMN.to_string(), years)];

    if temporal {
        let months: Vec<Option<f64>> = rows.iter().map(|r| r.key.timestamp.month().map(f64::from)).collect();
        let weeks: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.key.timestamp.iso_week().map(f64::from))
            .collect();
        cols.push((MONTH_COLUMN.to_string(), months));
        cols.push((WEEK_COLUMN.to_string(), weeks));
    }

    for feature in numeric {
        let values: Vec<Option<f64>> = rows
            .iter()
            .map(|r| {
                let v = r.metrics.get(&feature.metric).copied().flatten();
                if feature.log { log1p(v) } else { v }
            })
            .collect();
        cols.push((feature.column.clone(), values));
    }
    cols
}

/// Drop-first indicators per encoding, plus the levels no encoding knows.
fn indicator_columns(
    rows: &[&WideRow],
    categoricals: &[CategoricalEncoding],
) -> (Vec<(String, Vec<f64>)>, BTreeSet<(String, String)>) {
    let mut out = Vec::new();
    let mut unseen = BTreeSet::new();

    for (i, encoding) in categoricals.iter().enumerate() {
        let values: Vec<&str> = rows
            .iter()
            .map(|r| fill_category(r.key.group.get(i).and_then(|g| g.as_deref())))
            .collect();
        for &v in &values {
            if v != encoding.reference && !encoding.levels.iter().any(|l| l == v) {
                unseen.insert((encoding.column.clone(), v.to_string()));
            }
        }
        for level in &encoding.levels {
            let indicator: Vec<f64> = values
                .iter()
                .map(|&v| if v == level.as_str() { 1.0 } else { 0.0 })
                .collect();
            out.push((encoding.indicator_name(level), indicator));
        }
    }
    (out, unseen)
}

//! The collect / import / train / evaluate / predict / show workflows.
//!
//! Each workflow takes the process `Settings` and an open `Store`, and returns
//! a plain outcome struct; printing is left to `report`.
//!
//! adapter -> normalizer -> reconciler -> store -> features -> model

use std::path::PathBuf;

use chrono::Utc;
use nalgebra::DVector;
use tracing::info;

use crate::config::Settings;
use crate::data::faostat::{FaostatClient, FaostatQuery};
use crate::data::sources::{Source, load_source};
use crate::domain::{CanonicalDataset, Observation, Timestamp, WriteMode};
use crate::error::AppError;
use crate::features::{
    FeatureConfig, InferenceReport, RowKey, StandardScaler, build_inference_features_with_report,
    build_labelled_features, build_training_features, resolve_target, train_test_split,
};
use crate::io::artifacts::{ModelArtifact, SchemaBundle, load_artifacts, save_bundle, save_model};
use crate::io::export::write_canonical_csv;
use crate::math::{r2, rmse};
use crate::models::LinearModel;
use crate::normalize::normalize;
use crate::reconcile::merge;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub crop: String,
    pub country: String,
    pub element: String,
    pub start_year: i32,
    pub end_year: i32,
    pub table: String,
    pub mode: WriteMode,
    /// Keep a raw CSV copy of the response under `raw_dir`.
    pub cache: bool,
}

#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub table: String,
    pub fetched_rows: usize,
    pub rows_written: usize,
    pub cache_path: Option<PathBuf>,
}

/// Fetch from FAOSTAT, normalize and persist.
pub fn collect(settings: &Settings, store: &mut Store, request: &CollectRequest) -> Result<CollectOutcome, AppError> {
    let client = FaostatClient::from_settings(settings)?;
    let query = FaostatQuery {
        item: request.crop.clone(),
        element: request.element.clone(),
        area: request.country.clone(),
        start_year: request.start_year,
        end_year: request.end_year,
    };
    let cache_dir = request.cache.then_some(settings.raw_dir.as_path());
    let (raw, cache_path) = client.fetch_and_cache(&query, cache_dir)?;

    let source = Source::Faostat;
    let dataset = normalize(&raw, &source.column_map(&request.element))?;
    let dataset = merge(&[dataset], source.sort_keys())?;
    let rows_written = store.write(&request.table, &dataset, request.mode)?;

    info!(table = %request.table, rows_written, "collection finished");
    Ok(CollectOutcome {
        table: request.table.clone(),
        fetched_rows: raw.len(),
        rows_written,
        cache_path,
    })
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    /// Sources in precedence order: later entries win conflicts.
    pub sources: Vec<(Source, PathBuf)>,
    /// Value column for the bulk FAOSTAT layout.
    pub element: String,
    pub table: String,
    pub mode: WriteMode,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub table: String,
    /// Observations loaded per source, in input order.
    pub loaded: Vec<(Source, usize)>,
    pub merged_rows: usize,
    pub rows_written: usize,
    pub cache_path: PathBuf,
}

/// Load file sources, reconcile them into one dataset, cache and persist it.
pub fn import(settings: &Settings, store: &mut Store, request: &ImportRequest) -> Result<ImportOutcome, AppError> {
    let Some((first, _)) = request.sources.first() else {
        return Err(AppError::Config("At least one --source is required.".to_string()));
    };

    let mut datasets = Vec::with_capacity(request.sources.len());
    let mut loaded = Vec::with_capacity(request.sources.len());
    for (source, path) in &request.sources {
        let dataset = load_source(*source, path, &request.element)?;
        loaded.push((*source, dataset.len()));
        datasets.push(dataset);
    }

    let merged = merge(&datasets, first.sort_keys())?;
    let cache_path = settings.raw_dir.join(format!("{}_reconciled.csv", request.table));
    write_canonical_csv(&cache_path, &merged)?;
    let rows_written = store.write(&request.table, &merged, request.mode)?;

    info!(table = %request.table, rows_written, cache = %cache_path.display(), "import finished");
    Ok(ImportOutcome {
        table: request.table.clone(),
        loaded,
        merged_rows: merged.len(),
        rows_written,
        cache_path,
    })
}

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub table: String,
    pub target: Option<String>,
    pub temporal: bool,
    pub log_columns: Vec<String>,
    pub test_size: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub target: String,
    pub columns: Vec<String>,
    pub n_train: usize,
    pub n_test: usize,
    pub train_rmse: f64,
    pub test_rmse: f64,
    pub test_r2: f64,
    pub schema_fingerprint: String,
    pub schema_path: PathBuf,
    pub model_path: PathBuf,
}

/// Split, fit schema + scaler + model on the training rows, score the holdout,
/// and save the artifacts.
pub fn train(settings: &Settings, store: &Store, request: &TrainRequest) -> Result<TrainOutcome, AppError> {
    let dataset = store.read(&request.table, None)?;
    let target = resolve_target(&dataset, request.target.as_deref())?;
    let (train_ds, test_ds) = train_test_split(&dataset, &target, request.test_size, request.seed)?;

    let config = FeatureConfig {
        target_metric: Some(target.clone()),
        temporal: request.temporal,
        log_columns: request.log_columns.clone(),
    };
    let training = build_training_features(&train_ds, &config)?;
    let scaler = StandardScaler::fit(&training.matrix)?;
    let x_train = scaler.transform(&training.matrix)?;
    let model = LinearModel::fit(&x_train, &training.target)?;
    let train_rmse = score(&training.target, &model.predict(&x_train)?)?.0;

    let (test_matrix, y_test) = build_labelled_features(&test_ds, &training.schema)?;
    let x_test = scaler.transform(&test_matrix)?;
    let (test_rmse, test_r2) = score(&y_test, &model.predict(&x_test)?)?;

    let artifact = ModelArtifact::new(&model, &training.schema, Utc::now());
    let bundle = SchemaBundle {
        schema: training.schema,
        scaler,
    };
    save_bundle(&settings.schema_path, &bundle)?;
    save_model(&settings.model_path, &artifact)?;

    info!(
        target = %target,
        features = bundle.schema.columns.len(),
        n_train = training.matrix.n_rows(),
        n_test = test_matrix.n_rows(),
        test_rmse,
        "model trained"
    );

    Ok(TrainOutcome {
        target,
        columns: bundle.schema.columns.clone(),
        n_train: training.matrix.n_rows(),
        n_test: test_matrix.n_rows(),
        train_rmse,
        test_rmse,
        test_r2,
        schema_fingerprint: bundle.schema.fingerprint.clone(),
        schema_path: settings.schema_path.clone(),
        model_path: settings.model_path.clone(),
    })
}

#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub table: String,
    pub target: String,
    pub n: usize,
    pub rmse: f64,
    pub r2: f64,
}

/// Score the saved model on every labelled row of `table`.
pub fn evaluate(settings: &Settings, store: &Store, table: &str) -> Result<EvalOutcome, AppError> {
    let (bundle, artifact) = load_artifacts(&settings.schema_path, &settings.model_path)?;
    let dataset = store.read(table, None)?;

    let (matrix, y) = build_labelled_features(&dataset, &bundle.schema)?;
    let x = bundle.scaler.transform(&matrix)?;
    let (rmse, r2) = score(&y, &artifact.model().predict(&x)?)?;

    Ok(EvalOutcome {
        table: table.to_string(),
        target: bundle.schema.target_metric.clone(),
        n: matrix.n_rows(),
        rmse,
        r2,
    })
}

#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub timestamp: Timestamp,
    /// `(group column, value)`; unspecified group columns are unknown.
    pub group: Vec<(String, String)>,
    /// `(metric, value)` for numeric features.
    pub features: Vec<(String, f64)>,
}

#[derive(Debug, Clone)]
pub struct PredictOutcome {
    pub key: RowKey,
    pub target: String,
    pub prediction: f64,
    pub report: InferenceReport,
}

/// Predict the target for one manually described row.
pub fn predict(settings: &Settings, request: &PredictRequest) -> Result<PredictOutcome, AppError> {
    let (bundle, artifact) = load_artifacts(&settings.schema_path, &settings.model_path)?;
    let schema = &bundle.schema;

    let dataset = manual_dataset(&schema.group_columns, &schema.target_metric, request)?;
    let (matrix, report) = build_inference_features_with_report(&dataset, schema)?;
    let x = bundle.scaler.transform(&matrix)?;
    let predictions = artifact.model().predict(&x)?;

    let (Some(key), Some(&prediction)) = (matrix.keys.first(), predictions.iter().next()) else {
        return Err(AppError::Model("No prediction produced.".to_string()));
    };
    Ok(PredictOutcome {
        key: key.clone(),
        target: schema.target_metric.clone(),
        prediction,
        report,
    })
}

/// First `limit` rows of `table`.
pub fn show(store: &Store, table: &str, limit: usize) -> Result<CanonicalDataset, AppError> {
    store.read(table, Some(limit))
}

/// One wide row as long observations. The target carries no value and only
/// anchors the row when no features are given.
fn manual_dataset(
    group_columns: &[String],
    target: &str,
    request: &PredictRequest,
) -> Result<CanonicalDataset, AppError> {
    if let Some((unknown, _)) = request
        .group
        .iter()
        .find(|(k, _)| !group_columns.iter().any(|c| c == k))
    {
        return Err(AppError::Config(format!(
            "Unknown group column `{unknown}` (model uses: {}).",
            group_columns.join(", ")
        )));
    }

    let group: Vec<Option<String>> = group_columns
        .iter()
        .map(|col| {
            request
                .group
                .iter()
                .rev()
                .find(|(k, _)| k == col)
                .map(|(_, v)| v.clone())
        })
        .collect();

    let mut observations = vec![Observation {
        group: group.clone(),
        timestamp: Some(request.timestamp),
        metric: target.to_string(),
        value: None,
    }];
    observations.extend(request.features.iter().map(|(metric, value)| Observation {
        group: group.clone(),
        timestamp: Some(request.timestamp),
        metric: metric.clone(),
        value: Some(*value),
    }));

    CanonicalDataset::new(group_columns.to_vec(), observations)
}

fn score(observed: &DVector<f64>, predicted: &DVector<f64>) -> Result<(f64, f64), AppError> {
    let (y, p) = (observed.as_slice(), predicted.as_slice());
    match (rmse(y, p), r2(y, p)) {
        (Some(rmse), Some(r2)) => Ok((rmse, r2)),
        _ => Err(AppError::InsufficientData("Nothing to score.".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;

    fn settings(dir: &std::path::Path) -> Settings {
        let data = dir.to_string_lossy().to_string();
        Settings::from_lookup(move |key| (key == "AGRI_DATA_DIR").then(|| data.clone())).unwrap()
    }

    fn write_faostat_table(store: &mut Store) {
        // Yield = 0.1 * (year - 2000) + 1.0 for Kenya, +0.5 for Uganda.
        let mut obs = Vec::new();
        for year in 2000..2020 {
            for (area, offset) in [("Kenya", 0.0), ("Uganda", 0.5)] {
                obs.push(Observation {
                    group: vec![Some(area.to_string()), Some("Maize".to_string())],
                    timestamp: Some(Timestamp::Year(year)),
                    metric: "Yield".to_string(),
                    value: Some(0.1 * f64::from(year - 2000) + 1.0 + offset),
                });
            }
        }
        let ds = CanonicalDataset::new(vec!["area".to_string(), "item".to_string()], obs).unwrap();
        store.write("maize_yield", &ds, WriteMode::Replace).unwrap();
    }

    fn train_request() -> TrainRequest {
        TrainRequest {
            table: "maize_yield".to_string(),
            target: None,
            temporal: false,
            log_columns: Vec::new(),
            test_size: 0.2,
            seed: 42,
        }
    }

    #[test]
    fn train_evaluate_predict_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let mut store = Store::open(&settings.database_path).unwrap();
        write_faostat_table(&mut store);

        let trained = train(&settings, &store, &train_request()).unwrap();
        assert_eq!(trained.target, "Yield");
        assert_eq!(trained.columns, vec!["year".to_string(), "area_Uganda".to_string()]);
        assert_eq!(trained.n_test, 8);
        assert_eq!(trained.n_train, 32);
        assert!(trained.test_rmse < 1e-6);
        assert!(settings.schema_path.exists() && settings.model_path.exists());

        let eval = evaluate(&settings, &store, "maize_yield").unwrap();
        assert_eq!(eval.n, 40);
        assert!(eval.rmse < 1e-6);
        assert_relative_eq!(eval.r2, 1.0, epsilon = 1e-9);

        let pred = predict(
            &settings,
            &PredictRequest {
                timestamp: Timestamp::Year(2025),
                group: vec![("area".to_string(), "Uganda".to_string())],
                features: Vec::new(),
            },
        )
        .unwrap();
        assert_relative_eq!(pred.prediction, 4.0, epsilon = 1e-6);
        assert_eq!(pred.key.group[1], None);
        assert_eq!(pred.report.unseen_levels, vec![("item".to_string(), "Unknown".to_string())]);
    }

    #[test]
    fn unseen_country_predicts_at_the_reference_level() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let mut store = Store::open(&settings.database_path).unwrap();
        write_faostat_table(&mut store);
        train(&settings, &store, &train_request()).unwrap();

        let pred = predict(
            &settings,
            &PredictRequest {
                timestamp: Timestamp::Year(2020),
                group: vec![
                    ("area".to_string(), "Tanzania".to_string()),
                    ("item".to_string(), "Maize".to_string()),
                ],
                features: vec![("Rainfall".to_string(), 800.0)],
            },
        )
        .unwrap();
        assert_relative_eq!(pred.prediction, 3.0, epsilon = 1e-6);
        assert_eq!(pred.report.dropped_metrics, vec!["Rainfall".to_string()]);

        let err = predict(
            &settings,
            &PredictRequest {
                timestamp: Timestamp::Year(2020),
                group: vec![("county".to_string(), "Nakuru".to_string())],
                features: Vec::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn predict_without_training_points_at_train() {
        let dir = tempfile::tempdir().unwrap();
        let err = predict(
            &settings(dir.path()),
            &PredictRequest {
                timestamp: Timestamp::Year(2020),
                group: Vec::new(),
                features: Vec::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn import_reconciles_price_feeds_and_caches_them() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let kamis = dir.path().join("kamis.csv");
        fs::write(
            &kamis,
            "Date,County,Market,Commodity,Wholesale\n\
             2024-01-02,Nakuru,Wakulima,Maize,3400\n\
             2024-01-01,Nakuru,Wakulima,Maize,3300\n",
        )
        .unwrap();
        let agribora = dir.path().join("agribora.csv");
        fs::write(
            &agribora,
            "date,county,market,commodity,price\n02/01/2024,Nakuru,Wakulima,Maize,3450\n",
        )
        .unwrap();

        let mut store = Store::open_in_memory().unwrap();
        let outcome = import(
            &settings,
            &mut store,
            &ImportRequest {
                sources: vec![(Source::Kamis, kamis), (Source::Agribora, agribora)],
                element: "Yield".to_string(),
                table: "maize_prices".to_string(),
                mode: WriteMode::FailIfExists,
            },
        )
        .unwrap();
        assert_eq!(outcome.loaded, vec![(Source::Kamis, 2), (Source::Agribora, 1)]);
        assert_eq!(outcome.merged_rows, 2);
        assert_eq!(outcome.rows_written, 2);

        let cached = fs::read_to_string(&outcome.cache_path).unwrap();
        assert_eq!(
            cached,
            "county,market,commodity,timestamp,metric,value\n\
             Nakuru,Wakulima,Maize,2024-01-01,price,3300\n\
             Nakuru,Wakulima,Maize,2024-01-02,price,3450\n"
        );

        let preview = show(&store, "maize_prices", 1).unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview.observations()[0].value, Some(3300.0));
    }

    #[test]
    fn show_unknown_table_suggests_collection() {
        let store = Store::open_in_memory().unwrap();
        let err = show(&store, "maize_yield", 5).unwrap_err();
        assert!(err.to_string().contains("agri collect"));
    }

    #[test]
    fn collect_failure_leaves_store_and_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().to_string_lossy().to_string();
        // Nothing listens on port 9 locally; the request fails fast.
        let settings = Settings::from_lookup(move |key| match key {
            "AGRI_DATA_DIR" => Some(data.clone()),
            "FAOSTAT_BASE_URL" => Some("http://127.0.0.1:9".to_string()),
            "AGRI_REQUEST_TIMEOUT_SECS" => Some("2".to_string()),
            _ => None,
        })
        .unwrap();
        let mut store = Store::open_in_memory().unwrap();
        let err = collect(
            &settings,
            &mut store,
            &CollectRequest {
                crop: "Maize".to_string(),
                country: "Kenya".to_string(),
                element: "Yield".to_string(),
                start_year: 2000,
                end_year: 2001,
                table: "maize_yield".to_string(),
                mode: WriteMode::FailIfExists,
                cache: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
        assert!(!store.table_exists("maize_yield").unwrap());
        assert!(!settings.raw_dir.exists());
    }
}

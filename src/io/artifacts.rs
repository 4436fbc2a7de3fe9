//! Read/write training artifacts.
//!
//! Training produces two JSON files:
//! - the schema bundle: frozen feature schema + fitted scaler
//! - the model: coefficients stamped with the schema they were fitted on
//!
//! They are only ever loaded as a pair; `load_artifacts` refuses a model
//! whose fingerprint, columns or width disagree with the bundle.

use std::fs::{File, create_dir_all};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::features::{FeatureSchema, StandardScaler};
use crate::models::LinearModel;

pub const TOOL_NAME: &str = "agri";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaBundle {
    pub schema: FeatureSchema,
    pub scaler: StandardScaler,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub tool: String,
    pub trained_at: DateTime<Utc>,
    pub schema_version: u32,
    pub schema_fingerprint: String,
    pub target_metric: String,
    pub columns: Vec<String>,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl ModelArtifact {
    pub fn new(model: &LinearModel, schema: &FeatureSchema, trained_at: DateTime<Utc>) -> Self {
        Self {
            tool: TOOL_NAME.to_string(),
            trained_at,
            schema_version: schema.version,
            schema_fingerprint: schema.fingerprint.clone(),
            target_metric: schema.target_metric.clone(),
            columns: schema.columns.clone(),
            intercept: model.intercept,
            coefficients: model.coefficients.clone(),
        }
    }

    pub fn model(&self) -> LinearModel {
        LinearModel {
            intercept: self.intercept,
            coefficients: self.coefficients.clone(),
        }
    }
}

pub fn save_bundle(path: &Path, bundle: &SchemaBundle) -> Result<(), AppError> {
    write_json(path, bundle)
}

pub fn save_model(path: &Path, artifact: &ModelArtifact) -> Result<(), AppError> {
    write_json(path, artifact)
}

pub fn load_bundle(path: &Path) -> Result<SchemaBundle, AppError> {
    read_json(path)
}

pub fn load_model(path: &Path) -> Result<ModelArtifact, AppError> {
    read_json(path)
}

/// Load and cross-check the schema bundle and the model.
pub fn load_artifacts(schema_path: &Path, model_path: &Path) -> Result<(SchemaBundle, ModelArtifact), AppError> {
    let bundle = load_bundle(schema_path)?;
    let model = load_model(model_path)?;
    check_pair(&bundle, &model)?;
    Ok((bundle, model))
}

pub fn check_pair(bundle: &SchemaBundle, model: &ModelArtifact) -> Result<(), AppError> {
    let schema = &bundle.schema;
    schema.verify()?;

    if model.schema_version != schema.version || model.schema_fingerprint != schema.fingerprint {
        return Err(AppError::FeatureSchemaMismatch(format!(
            "Model was trained against schema {} (v{}) but the bundle holds {} (v{}); retrain.",
            model.schema_fingerprint, model.schema_version, schema.fingerprint, schema.version
        )));
    }
    if model.columns != schema.columns || bundle.scaler.columns != schema.columns {
        return Err(AppError::FeatureSchemaMismatch(
            "Model, scaler and schema disagree on the feature columns.".to_string(),
        ));
    }
    if model.coefficients.len() != schema.columns.len()
        || bundle.scaler.means.len() != schema.columns.len()
        || bundle.scaler.scales.len() != schema.columns.len()
    {
        return Err(AppError::FeatureSchemaMismatch(format!(
            "Expected {} coefficients and scaler entries, found {} / {}.",
            schema.columns.len(),
            model.coefficients.len(),
            bundle.scaler.means.len()
        )));
    }
    if model.target_metric != schema.target_metric {
        return Err(AppError::FeatureSchemaMismatch(format!(
            "Model predicts `{}` but the schema targets `{}`.",
            model.target_metric, schema.target_metric
        )));
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)
            .map_err(|e| AppError::Io(format!("Failed to create '{}': {e}", parent.display())))?;
    }
    let file = File::create(path)
        .map_err(|e| AppError::Artifact(format!("Failed to create '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, value)
        .map_err(|e| AppError::Artifact(format!("Failed to write '{}': {e}", path.display())))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    if !path.exists() {
        return Err(AppError::NotFound(format!(
            "Artifact '{}' does not exist; run `agri train` first.",
            path.display()
        )));
    }
    let file = File::open(path)
        .map_err(|e| AppError::Artifact(format!("Failed to open '{}': {e}", path.display())))?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::Artifact(format!("Invalid artifact '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CanonicalDataset, Observation, Timestamp};
    use crate::features::{FeatureConfig, build_training_features};

    fn trained() -> (SchemaBundle, ModelArtifact) {
        let obs = [("Kenya", 2020, 1.0), ("Kenya", 2021, 2.0), ("Uganda", 2021, 1.5)]
            .iter()
            .map(|(area, year, v)| Observation {
                group: vec![Some(area.to_string())],
                timestamp: Some(Timestamp::Year(*year)),
                metric: "Yield".to_string(),
                value: Some(*v),
            })
            .collect();
        let ds = CanonicalDataset::new(vec!["area".to_string()], obs).unwrap();
        let tf = build_training_features(&ds, &FeatureConfig::default()).unwrap();
        let scaler = StandardScaler::fit(&tf.matrix).unwrap();
        let x = scaler.transform(&tf.matrix).unwrap();
        let model = LinearModel::fit(&x, &tf.target).unwrap();
        let artifact = ModelArtifact::new(&model, &tf.schema, Utc::now());
        (SchemaBundle { schema: tf.schema, scaler }, artifact)
    }

    #[test]
    fn saved_pair_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("models").join("feature_schema.json");
        let model_path = dir.path().join("models").join("model.json");
        let (bundle, artifact) = trained();
        save_bundle(&schema_path, &bundle).unwrap();
        save_model(&model_path, &artifact).unwrap();

        let (b, m) = load_artifacts(&schema_path, &model_path).unwrap();
        assert_eq!(b.schema, bundle.schema);
        assert_eq!(m.coefficients, artifact.coefficients);
        assert_eq!(m.tool, "agri");
    }

    #[test]
    fn long_decimal_medians_survive_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("feature_schema.json");
        let model_path = dir.path().join("model.json");
        let (mut bundle, original) = trained();

        // Medians with long shortest-decimal forms.
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        for i in 0..500 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let median = (state >> 11) as f64 / (1u64 << 53) as f64 * 5000.0;
            bundle.schema.medians.insert(format!("rainfall_{i}"), median);
        }
        bundle.schema.medians.insert("rainfall".to_string(), 1451.1868159823155);
        bundle.schema.fingerprint = bundle.schema.compute_fingerprint().unwrap();
        let artifact = ModelArtifact::new(&original.model(), &bundle.schema, Utc::now());

        save_bundle(&schema_path, &bundle).unwrap();
        save_model(&model_path, &artifact).unwrap();
        let (loaded, _) = load_artifacts(&schema_path, &model_path).unwrap();
        assert_eq!(loaded.schema.medians, bundle.schema.medians);
        assert_eq!(loaded.schema.fingerprint, bundle.schema.fingerprint);
    }

    #[test]
    fn mismatched_fingerprint_is_refused() {
        let (bundle, mut artifact) = trained();
        artifact.schema_fingerprint = "0".repeat(64);
        assert!(matches!(
            check_pair(&bundle, &artifact),
            Err(AppError::FeatureSchemaMismatch(_))
        ));
    }

    #[test]
    fn wrong_coefficient_count_is_refused() {
        let (bundle, mut artifact) = trained();
        artifact.coefficients.push(0.0);
        assert!(matches!(
            check_pair(&bundle, &artifact),
            Err(AppError::FeatureSchemaMismatch(_))
        ));
    }

    #[test]
    fn edited_schema_is_refused() {
        let (mut bundle, artifact) = trained();
        bundle.schema.medians.insert("year".to_string(), 1900.0);
        assert!(matches!(
            check_pair(&bundle, &artifact),
            Err(AppError::FeatureSchemaMismatch(_))
        ));
    }

    #[test]
    fn missing_artifact_points_at_training() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_bundle(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref msg) if msg.contains("agri train")));
    }
}

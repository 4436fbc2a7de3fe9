//! Feature engineering: pivoting, encoding, imputation, scaling and the
//! persisted schema that ties training to inference.

pub mod builder;
pub mod impute;
pub mod scaler;
pub mod schema;
pub mod split;

pub use builder::{
    FeatureConfig, FeatureMatrix, InferenceReport, RowKey, TrainingFeatures, build_inference_features,
    build_inference_features_with_report, build_labelled_features, build_training_features, resolve_target,
};
pub use scaler::StandardScaler;
pub use schema::{CategoricalEncoding, FEATURE_SCHEMA_VERSION, FeatureSchema, NumericFeature};
pub use split::train_test_split;

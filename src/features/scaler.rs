//! Column-wise standardization fitted on training features.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::features::builder::FeatureMatrix;
use crate::math::mean_std;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub columns: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl StandardScaler {
    /// Population mean and std per column. Constant columns scale by 1.0.
    pub fn fit(features: &FeatureMatrix) -> Result<Self, AppError> {
        if features.n_rows() == 0 {
            return Err(AppError::InsufficientData(
                "Cannot fit a scaler on zero rows.".to_string(),
            ));
        }

        let mut means = Vec::with_capacity(features.n_cols());
        let mut scales = Vec::with_capacity(features.n_cols());
        for j in 0..features.n_cols() {
            let col: Vec<f64> = features.values.column(j).iter().copied().collect();
            let (mean, std) = mean_std(&col).unwrap_or((0.0, 1.0));
            means.push(mean);
            scales.push(if std > 0.0 && std.is_finite() { std } else { 1.0 });
        }

        Ok(Self {
            columns: features.columns.clone(),
            means,
            scales,
        })
    }

    pub fn transform(&self, features: &FeatureMatrix) -> Result<DMatrix<f64>, AppError> {
        if features.columns != self.columns {
            return Err(AppError::FeatureSchemaMismatch(format!(
                "Scaler was fitted on columns [{}] but received [{}].",
                self.columns.join(", "),
                features.columns.join(", ")
            )));
        }

        let mut out = features.values.clone();
        for (j, mut col) in out.column_iter_mut().enumerate() {
            let (mean, scale) = (self.means[j], self.scales[j]);
            for v in col.iter_mut() {
                *v = (*v - mean) / scale;
            }
        }
        Ok(out)
    }
}

//! Ordinary least squares regression with an intercept.
//!
//! Inputs are the standardized feature matrix; the fitted coefficients are
//! therefore in scaled units and only meaningful together with the scaler
//! they were trained behind.

use nalgebra::{DMatrix, DVector};

use crate::error::AppError;
use crate::math::{solve_least_squares, with_intercept};

#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn fit(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<Self, AppError> {
        if x.nrows() != y.len() {
            return Err(AppError::Model(format!(
                "Feature rows ({}) and targets ({}) differ.",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(AppError::InsufficientData("Cannot fit on zero rows.".to_string()));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(AppError::Model("Non-finite value in training data.".to_string()));
        }

        let design = with_intercept(x);
        let beta = solve_least_squares(&design, y)
            .ok_or_else(|| AppError::Model("Least squares solve failed.".to_string()))?;

        Ok(Self {
            intercept: beta[0],
            coefficients: beta.iter().skip(1).copied().collect(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    pub fn predict(&self, x: &DMatrix<f64>) -> Result<DVector<f64>, AppError> {
        if x.ncols() != self.coefficients.len() {
            return Err(AppError::FeatureSchemaMismatch(format!(
                "Model expects {} features, got {}.",
                self.coefficients.len(),
                x.ncols()
            )));
        }
        let beta = DVector::from_column_slice(&self.coefficients);
        Ok((x * beta).add_scalar(self.intercept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_exact_linear_relation() {
        // y = 1 + 2a - 0.5b
        let x = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 3.0, 1.0]);
        let y = DVector::from_iterator(4, x.row_iter().map(|r| 1.0 + 2.0 * r[0] - 0.5 * r[1]));
        let model = LinearModel::fit(&x, &y).unwrap();
        assert_relative_eq!(model.intercept, 1.0, epsilon = 1e-9);
        assert_relative_eq!(model.coefficients[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(model.coefficients[1], -0.5, epsilon = 1e-9);

        let pred = model.predict(&DMatrix::from_row_slice(1, 2, &[1.0, 1.0])).unwrap();
        assert_relative_eq!(pred[0], 2.5, epsilon = 1e-9);
    }

    #[test]
    fn constant_feature_does_not_break_the_fit() {
        // Standardized constant columns are all zero.
        let x = DMatrix::from_row_slice(3, 2, &[-1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let model = LinearModel::fit(&x, &y).unwrap();
        assert_relative_eq!(model.intercept, 2.0, epsilon = 1e-9);
        assert_relative_eq!(model.coefficients[0], 1.0, epsilon = 1e-9);
        assert!(model.coefficients[1].abs() < 1e-9);
    }

    #[test]
    fn rejects_wrong_width_at_predict_time() {
        let x = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let y = DVector::from_row_slice(&[0.0, 1.0]);
        let model = LinearModel::fit(&x, &y).unwrap();
        let wide = DMatrix::from_row_slice(1, 2, &[0.0, 1.0]);
        assert!(matches!(model.predict(&wide), Err(AppError::FeatureSchemaMismatch(_))));
    }
}

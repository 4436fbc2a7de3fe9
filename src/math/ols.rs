//! Least squares solver.
//!
//! Fits `minimize Σ (y_i - x_i^T β)^2` for the regression model. Feature
//! matrices here are tall and can be rank deficient (for example a one-hot
//! column that is constant in the training split), so we solve through SVD,
//! which returns the minimum-norm solution instead of failing.
//!
//! (Nalgebra's `QR::solve` is intended for square systems and will panic for
//! non-square matrices.)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Prepend a column of ones (intercept) to `x`.
pub fn with_intercept(x: &DMatrix<f64>) -> DMatrix<f64> {
    x.clone().insert_column(0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = with_intercept(&DMatrix::from_row_slice(3, 1, &[0.0, 1.0, 2.0]));
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn rank_deficient_system_still_solves() {
        // Second column duplicates the first: infinitely many solutions.
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let y = DVector::from_row_slice(&[2.0, 4.0, 6.0]);
        let beta = solve_least_squares(&x, &y).unwrap();
        let fitted = &x * &beta;
        for (f, t) in fitted.iter().zip(y.iter()) {
            assert!((f - t).abs() < 1e-8);
        }
    }
}

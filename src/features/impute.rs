//! Missing-value policy.
//!
//! Numeric columns are filled with the median of the observed training
//! values. Categorical nulls become [`UNKNOWN_CATEGORY`].

use crate::features::schema::UNKNOWN_CATEGORY;
use crate::math::median;

/// Median of the observed values; 0.0 when nothing was observed.
pub fn fit_median(values: &[Option<f64>]) -> f64 {
    let observed: Vec<f64> = values.iter().flatten().copied().collect();
    median(&observed).unwrap_or(0.0)
}

/// Replace nulls (and non-finite values) with `fill`.
pub fn fill_numeric(values: &[Option<f64>], fill: f64) -> Vec<f64> {
    values
        .iter()
        .map(|v| match v {
            Some(x) if x.is_finite() => *x,
            _ => fill,
        })
        .collect()
}

pub fn fill_category(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => UNKNOWN_CATEGORY,
    }
}

/// `ln(1 + x)`; inputs at or below -1 have no finite result and become null.
pub fn log1p(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > -1.0).map(f64::ln_1p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn median_ignores_nulls() {
        let col = [Some(1.0), None, Some(3.0)];
        let m = fit_median(&col);
        assert_relative_eq!(m, 2.0);
        assert_eq!(fill_numeric(&col, m), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn all_null_column_gets_zero() {
        assert_eq!(fit_median(&[None, None]), 0.0);
        assert_eq!(fit_median(&[]), 0.0);
    }

    #[test]
    fn categorical_nulls_become_unknown() {
        assert_eq!(fill_category(None), "Unknown");
        assert_eq!(fill_category(Some("  ")), "Unknown");
        assert_eq!(fill_category(Some("Kenya")), "Kenya");
    }

    #[test]
    fn log1p_rejects_out_of_domain() {
        assert_relative_eq!(log1p(Some(0.0)).unwrap(), 0.0);
        assert_relative_eq!(log1p(Some(std::f64::consts::E - 1.0)).unwrap(), 1.0);
        assert_eq!(log1p(Some(-1.0)), None);
        assert_eq!(log1p(None), None);
    }
}

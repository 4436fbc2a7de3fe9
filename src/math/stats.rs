//! Small descriptive statistics used by imputation, scaling and evaluation.

/// Median of finite values; `None` for an empty input.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Mean and population standard deviation (`ddof = 0`).
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Root mean squared error between observed and predicted values.
pub fn rmse(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }
    let sse: f64 = observed.iter().zip(predicted).map(|(y, p)| (y - p).powi(2)).sum();
    Some((sse / observed.len() as f64).sqrt())
}

/// Coefficient of determination.
///
/// A constant target has no variance to explain: the result is 1.0 for a
/// perfect fit and 0.0 otherwise.
pub fn r2(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }
    let (mean, _) = mean_std(observed)?;
    let ss_res: f64 = observed.iter().zip(predicted).map(|(y, p)| (y - p).powi(2)).sum();
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return Some(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Some(1.0 - ss_res / ss_tot)
}

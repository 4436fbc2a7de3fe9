//! Seeded train/test split over wide row keys.

use std::collections::HashSet;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::domain::{CanonicalDataset, Observation};
use crate::error::AppError;
use crate::features::builder::RowKey;

/// Split so that all observations of one `(entity, timestamp)` row land on
/// the same side. Only rows carrying a `target` value are counted.
pub fn train_test_split(
    dataset: &CanonicalDataset,
    target: &str,
    test_size: f64,
    seed: u64,
) -> Result<(CanonicalDataset, CanonicalDataset), AppError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(AppError::Config(format!(
            "Test size must be between 0 and 1 (exclusive), got {test_size}."
        )));
    }

    let mut seen = HashSet::new();
    let mut keys: Vec<RowKey> = dataset
        .observations()
        .iter()
        .filter(|o| o.metric == target && o.value.is_some_and(f64::is_finite))
        .filter_map(|o| {
            o.timestamp.map(|timestamp| RowKey {
                group: o.group.clone(),
                timestamp,
            })
        })
        .filter(|k| seen.insert(k.clone()))
        .collect();

    let n = keys.len();
    if n < 2 {
        return Err(AppError::InsufficientData(format!(
            "Need at least 2 labelled rows to split, found {n}."
        )));
    }
    // Tolerance keeps 10 * 0.2 at 2 rather than 3.
    let n_test = ((n as f64 * test_size - 1e-9).ceil() as usize).clamp(1, n - 1);

    let mut rng = StdRng::seed_from_u64(seed);
    keys.shuffle(&mut rng);
    let test: HashSet<RowKey> = keys.into_iter().take(n_test).collect();

    let in_test = |o: &Observation| {
        o.timestamp.is_some_and(|timestamp| {
            test.contains(&RowKey {
                group: o.group.clone(),
                timestamp,
            })
        })
    };
    let test_ds = dataset.filtered(&in_test);
    let train_ds = dataset.filtered(|o| !in_test(o));
    Ok((train_ds, test_ds))
}

//! Stratified train/test splitting

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use crate::error::{MlopsError, Result};

/// Train and holdout partitions of a labeled dataset
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_test: Array1<usize>,
    /// Row indices into the source data
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

/// Split rows into train and test partitions preserving class proportions.
///
/// The test partition holds `ceil(test_size * n)` rows. They are spread over
/// the classes in proportion to class size, flooring each share and handing
/// the leftover rows to the largest fractional remainders (lowest label first
/// on ties). The same seed always yields the same partition.
pub fn train_test_split(
    x: &Array2<f64>,
    y: &Array1<usize>,
    test_size: f64,
    seed: u64,
) -> Result<TrainTestSplit> {
    if x.nrows() != y.len() {
        return Err(MlopsError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }

    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(MlopsError::DataError(format!(
            "test_size must be within (0, 1), got {}",
            test_size
        )));
    }

    // Ordered by label so the RNG stream is consumed identically across runs
    let mut class_indices: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in y.iter().enumerate() {
        class_indices.entry(label).or_default().push(i);
    }

    for (label, indices) in &class_indices {
        if indices.len() < 2 {
            return Err(MlopsError::DataError(format!(
                "class {} has only {} member, cannot stratify",
                label,
                indices.len()
            )));
        }
    }

    let n_samples = y.len();
    let n_classes = class_indices.len();
    let n_test = (test_size * n_samples as f64).ceil() as usize;
    let n_train = n_samples - n_test;
    if n_test < n_classes || n_train < n_classes {
        return Err(MlopsError::DataError(format!(
            "test_size {} gives {} test and {} train rows, both need at least {} (one per class)",
            test_size, n_test, n_train, n_classes
        )));
    }

    let class_sizes: Vec<usize> = class_indices.values().map(Vec::len).collect();
    let test_counts = allocate_test_rows(&class_sizes, n_test);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train_indices = Vec::with_capacity(n_train);
    let mut test_indices = Vec::with_capacity(n_test);

    for (mut indices, n_class_test) in class_indices.into_values().zip(test_counts) {
        indices.shuffle(&mut rng);
        test_indices.extend_from_slice(&indices[..n_class_test]);
        train_indices.extend_from_slice(&indices[n_class_test..]);
    }

    train_indices.shuffle(&mut rng);
    test_indices.shuffle(&mut rng);

    Ok(TrainTestSplit {
        x_train: x.select(Axis(0), &train_indices),
        x_test: x.select(Axis(0), &test_indices),
        y_train: train_indices.iter().map(|&i| y[i]).collect(),
        y_test: test_indices.iter().map(|&i| y[i]).collect(),
        train_indices,
        test_indices,
    })
}

/// Largest-remainder allocation of `n_test` rows over classes of the given sizes
fn allocate_test_rows(class_sizes: &[usize], n_test: usize) -> Vec<usize> {
    let total: usize = class_sizes.iter().sum();
    let shares: Vec<f64> = class_sizes
        .iter()
        .map(|&size| n_test as f64 * size as f64 / total as f64)
        .collect();
    let mut counts: Vec<usize> = shares.iter().map(|s| s.floor() as usize).collect();

    let mut order: Vec<usize> = (0..class_sizes.len()).collect();
    order.sort_by(|&a, &b| {
        let rem_a = shares[a] - shares[a].floor();
        let rem_b = shares[b] - shares[b].floor();
        rem_b.total_cmp(&rem_a).then(a.cmp(&b))
    });

    let mut leftover = n_test - counts.iter().sum::<usize>();
    for idx in order.into_iter().cycle() {
        if leftover == 0 {
            break;
        }
        // a class never gives away all of its rows
        if counts[idx] < class_sizes[idx] - 1 {
            counts[idx] += 1;
            leftover -= 1;
        }
    }
    counts
}

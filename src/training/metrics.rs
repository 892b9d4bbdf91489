//! Classification metrics
//!
//! Precision, recall and F1 are computed per class and averaged with
//! weights proportional to each class's support in the true labels.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MlopsError, Result};

/// Scores for a single class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassScores {
    pub label: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Occurrences in the true labels
    pub support: usize,
}

/// Holdout evaluation of a classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub precision_weighted: f64,
    pub recall_weighted: f64,
    pub f1_weighted: f64,
    pub per_class: Vec<ClassScores>,
}

#[derive(Default)]
struct Counts {
    tp: usize,
    fp: usize,
    fn_: usize,
    support: usize,
}

impl ClassificationReport {
    /// Compute metrics over the labels present in either `y_true` or `y_pred`.
    /// Undefined ratios (zero denominators) count as 0.
    pub fn compute(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("y_pred length = {}", y_true.len()),
                actual: format!("y_pred length = {}", y_pred.len()),
            });
        }
        if y_true.is_empty() {
            return Err(MlopsError::ValidationError("cannot score an empty prediction set".to_string()));
        }

        let mut counts: BTreeMap<usize, Counts> = BTreeMap::new();
        let mut correct = 0usize;

        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            counts.entry(t).or_default().support += 1;
            if t == p {
                correct += 1;
                counts.entry(t).or_default().tp += 1;
            } else {
                counts.entry(t).or_default().fn_ += 1;
                counts.entry(p).or_default().fp += 1;
            }
        }

        let per_class: Vec<ClassScores> = counts
            .into_iter()
            .map(|(label, c)| {
                let precision = ratio(c.tp, c.tp + c.fp);
                let recall = ratio(c.tp, c.tp + c.fn_);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassScores { label, precision, recall, f1, support: c.support }
            })
            .collect();

        let total = y_true.len() as f64;
        let weighted = |score: fn(&ClassScores) -> f64| -> f64 {
            per_class.iter().map(|c| score(c) * c.support as f64).sum::<f64>() / total
        };

        let precision_weighted = weighted(|c| c.precision);
        let recall_weighted = weighted(|c| c.recall);
        let f1_weighted = weighted(|c| c.f1);

        Ok(Self {
            accuracy: correct as f64 / total,
            precision_weighted,
            recall_weighted,
            f1_weighted,
            per_class,
        })
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_predictions() {
        let y = array![0, 1, 2, 0, 1, 2];
        let report = ClassificationReport::compute(&y, &y).unwrap();
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.f1_weighted, 1.0);
        assert_eq!(report.precision_weighted, 1.0);
        assert_eq!(report.recall_weighted, 1.0);
    }

    #[test]
    fn test_weighted_scores() {
        // class 0: support 3, predicted [0, 0, 1]
        // class 1: support 1, predicted [1]
        let y_true = array![0, 0, 0, 1];
        let y_pred = array![0, 0, 1, 1];
        let report = ClassificationReport::compute(&y_true, &y_pred).unwrap();

        assert!((report.accuracy - 0.75).abs() < 1e-12);

        // class 0: p=1, r=2/3, f1=0.8 ; class 1: p=0.5, r=1, f1=2/3
        let expected_precision = (3.0 * 1.0 + 1.0 * 0.5) / 4.0;
        let expected_recall = (3.0 * (2.0 / 3.0) + 1.0 * 1.0) / 4.0;
        let expected_f1 = (3.0 * 0.8 + 1.0 * (2.0 / 3.0)) / 4.0;
        assert!((report.precision_weighted - expected_precision).abs() < 1e-12);
        assert!((report.recall_weighted - expected_recall).abs() < 1e-12);
        assert!((report.f1_weighted - expected_f1).abs() < 1e-12);
    }

    #[test]
    fn test_predicted_only_label_has_zero_weight() {
        let y_true = array![0, 0];
        let y_pred = array![0, 5];
        let report = ClassificationReport::compute(&y_true, &y_pred).unwrap();

        let unseen = report.per_class.iter().find(|c| c.label == 5).unwrap();
        assert_eq!(unseen.support, 0);
        assert_eq!(unseen.precision, 0.0);
        // class 0: p=1, r=0.5
        assert!((report.recall_weighted - 0.5).abs() < 1e-12);
        assert!((report.precision_weighted - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch() {
        let y_true = array![0, 1];
        let y_pred = array![0];
        assert!(ClassificationReport::compute(&y_true, &y_pred).is_err());
    }
}

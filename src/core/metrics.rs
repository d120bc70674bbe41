//! Classification metrics over trial-level label pairs.

use std::collections::BTreeSet;

/// Fraction of predictions equal to the truth.
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / y_true.len() as f64
}

/// Per-class counts of true positives, false positives and false negatives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClassCounts {
    tp: usize,
    fp: usize,
    fn_: usize,
}

fn class_counts(y_true: &[usize], y_pred: &[usize], class: usize) -> ClassCounts {
    let mut counts = ClassCounts::default();
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == class, p == class) {
            (true, true) => counts.tp += 1,
            (false, true) => counts.fp += 1,
            (true, false) => counts.fn_ += 1,
            (false, false) => {}
        }
    }
    counts
}

/// Unweighted mean of per-class F1 over every label seen in truth or
/// prediction. A class with no true or predicted members scores 0.
pub fn f1_macro(y_true: &[usize], y_pred: &[usize]) -> f64 {
    let labels: BTreeSet<usize> = y_true.iter().chain(y_pred).copied().collect();
    if labels.is_empty() {
        return 0.0;
    }

    let total: f64 = labels
        .iter()
        .map(|&class| {
            let c = class_counts(y_true, y_pred, class);
            let denom = 2 * c.tp + c.fp + c.fn_;
            if denom == 0 {
                0.0
            } else {
                2.0 * c.tp as f64 / denom as f64
            }
        })
        .sum();
    total / labels.len() as f64
}

/// Mean recall over the classes present in the truth.
pub fn balanced_accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    let labels: BTreeSet<usize> = y_true.iter().copied().collect();
    if labels.is_empty() {
        return 0.0;
    }

    let total: f64 = labels
        .iter()
        .map(|&class| {
            let c = class_counts(y_true, y_pred, class);
            c.tp as f64 / (c.tp + c.fn_) as f64
        })
        .sum();
    total / labels.len() as f64
}

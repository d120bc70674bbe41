//! Trial-level scoring of cropped predictions.
//!
//! A model in cropped mode emits one prediction per output timestep for each
//! window. Scoring regroups those timesteps by trial, rebuilds the trial's
//! predicted timeline in chronological order, reduces it to a single label
//! and evaluates a metric over all trials of the pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

use crate::core::metrics;
use crate::core::windowing::{TrialId, Window};

/// Per-timestep class log-probabilities produced for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPrediction {
    pub trial_id: TrialId,
    /// First sample of the window in its recording
    pub start: i64,
    pub length: usize,
    pub valid_length: usize,
    /// Timesteps x classes
    pub log_probs: Vec<Vec<f64>>,
}

impl WindowPrediction {
    pub fn from_window(window: &Window, log_probs: Vec<Vec<f64>>) -> Self {
        Self {
            trial_id: window.trial_id.clone(),
            start: window.start,
            length: window.length,
            valid_length: window.valid_length,
            log_probs,
        }
    }

    /// Recording sample predicted by the first timestep.
    ///
    /// Output timesteps are right-aligned with the window: the last one
    /// predicts the window's last sample.
    pub fn first_predicted_sample(&self) -> i64 {
        self.start + self.length as i64 - self.log_probs.len() as i64
    }
}

/// Rule reducing a trial's timeline to one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Average log-probabilities over timesteps, then argmax
    #[default]
    MeanLogProb,
    /// Argmax per timestep, then the most frequent class
    MajorityVote,
}

/// Trial-level metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    F1Macro,
    BalancedAccuracy,
    /// Mean negative log-probability of the true class
    TrialNll,
}

impl Metric {
    /// Natural direction of the metric.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, Metric::TrialNll)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::F1Macro => "f1_macro",
            Metric::BalancedAccuracy => "balanced_accuracy",
            Metric::TrialNll => "trial_nll",
        }
    }
}

/// Phase of an epoch a callback is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Train,
    Valid,
}

/// Reading direction of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// The reduced prediction for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub trial_id: TrialId,
    pub true_label: usize,
    pub predicted_label: usize,
    /// Per-class mean log-probability over the trial timeline
    pub mean_log_probs: Vec<f64>,
    pub n_timesteps: usize,
}

/// A named metric value for one phase of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    pub phase: Phase,
    pub value: f64,
    pub direction: Direction,
    pub n_trials: usize,
    /// Best value so far in the run, filled in by the training history
    #[serde(default)]
    pub is_best: bool,
}

impl Score {
    /// Whether `self` improves on `other` according to the direction.
    pub fn improves_on(&self, other: f64) -> bool {
        match self.direction {
            Direction::HigherIsBetter => self.value > other,
            Direction::LowerIsBetter => self.value < other,
        }
    }
}

/// Errors raised while scoring a pass.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("no predictions for trial {trial_id}")]
    MissingTrialPredictions { trial_id: TrialId },

    #[error("predictions reference trial {trial_id} which has no ground truth")]
    UnknownTrial { trial_id: TrialId },

    #[error("trial {trial_id}: expected {expected} classes per timestep, found {found}")]
    ClassCountMismatch {
        trial_id: TrialId,
        expected: usize,
        found: usize,
    },

    #[error("trial {trial_id}: predictions carry no classes")]
    NoClasses { trial_id: TrialId },

    #[error("no trials to score")]
    EmptyPass,
}

/// Index of the largest value; ties go to the lowest index.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Reduce every trial of a pass to a single predicted label.
///
/// All predictions of the pass must be supplied at once. Timesteps that an
/// earlier window of the same trial already covered are skipped, as are
/// timesteps predicting padded samples.
pub fn aggregate_trials(
    predictions: &[WindowPrediction],
    truth: &BTreeMap<TrialId, usize>,
    aggregation: Aggregation,
) -> Result<Vec<TrialOutcome>, ScoringError> {
    if truth.is_empty() {
        return Err(ScoringError::EmptyPass);
    }

    let mut by_trial: BTreeMap<&TrialId, Vec<&WindowPrediction>> = BTreeMap::new();
    for prediction in predictions {
        if !truth.contains_key(&prediction.trial_id) {
            return Err(ScoringError::UnknownTrial {
                trial_id: prediction.trial_id.clone(),
            });
        }
        by_trial
            .entry(&prediction.trial_id)
            .or_default()
            .push(prediction);
    }

    let mut outcomes = Vec::with_capacity(truth.len());
    for (trial_id, &true_label) in truth {
        let missing = || ScoringError::MissingTrialPredictions {
            trial_id: trial_id.clone(),
        };
        let mut windows = by_trial.remove(trial_id).ok_or_else(missing)?;
        windows.sort_by_key(|w| w.start);

        let mut timeline: Vec<&[f64]> = Vec::new();
        let mut covered_until = i64::MIN;
        for window in windows {
            let first = window.first_predicted_sample();
            let valid_end = window.start + window.valid_length as i64;
            for (i, log_probs) in window.log_probs.iter().enumerate() {
                let sample = first + i as i64;
                if sample >= valid_end {
                    break;
                }
                if sample < covered_until {
                    continue;
                }
                timeline.push(log_probs);
                covered_until = sample + 1;
            }
        }

        let n_classes = timeline.first().map(|t| t.len()).ok_or_else(missing)?;
        if n_classes == 0 {
            return Err(ScoringError::NoClasses {
                trial_id: trial_id.clone(),
            });
        }
        if let Some(bad) = timeline.iter().find(|t| t.len() != n_classes) {
            return Err(ScoringError::ClassCountMismatch {
                trial_id: trial_id.clone(),
                expected: n_classes,
                found: bad.len(),
            });
        }

        let mean_log_probs: Vec<f64> = (0..n_classes)
            .map(|class| timeline.iter().map(|t| t[class]).mean())
            .collect();

        let predicted_label = match aggregation {
            Aggregation::MeanLogProb => argmax(&mean_log_probs),
            Aggregation::MajorityVote => {
                let mut votes = vec![0.0; n_classes];
                for t in &timeline {
                    votes[argmax(t)] += 1.0;
                }
                argmax(&votes)
            }
        };

        outcomes.push(TrialOutcome {
            trial_id: trial_id.clone(),
            true_label,
            predicted_label,
            mean_log_probs,
            n_timesteps: timeline.len(),
        });
    }

    Ok(outcomes)
}

/// A named trial-level metric attached to one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CroppedTrialScoring {
    pub name: String,
    pub metric: Metric,
    pub phase: Phase,
    pub lower_is_better: bool,
    #[serde(default)]
    pub aggregation: Aggregation,
}

impl CroppedTrialScoring {
    /// Create a callback using the metric's natural direction.
    pub fn new(name: impl Into<String>, metric: Metric, phase: Phase) -> Self {
        Self {
            name: name.into(),
            metric,
            phase,
            lower_is_better: metric.lower_is_better(),
            aggregation: Aggregation::default(),
        }
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_lower_is_better(mut self, lower_is_better: bool) -> Self {
        self.lower_is_better = lower_is_better;
        self
    }

    pub fn direction(&self) -> Direction {
        if self.lower_is_better {
            Direction::LowerIsBetter
        } else {
            Direction::HigherIsBetter
        }
    }

    /// Score one full pass of predictions against the trial labels.
    pub fn score(
        &self,
        predictions: &[WindowPrediction],
        truth: &BTreeMap<TrialId, usize>,
    ) -> Result<Score, ScoringError> {
        let outcomes = aggregate_trials(predictions, truth, self.aggregation)?;
        let value = metric_value(self.metric, &outcomes)?;

        tracing::debug!(
            callback = %self.name,
            trials = outcomes.len(),
            value,
            "scored trials"
        );

        Ok(Score {
            name: self.name.clone(),
            phase: self.phase,
            value,
            direction: self.direction(),
            n_trials: outcomes.len(),
            is_best: false,
        })
    }
}

/// Evaluate a metric over reduced trial outcomes.
pub fn metric_value(metric: Metric, outcomes: &[TrialOutcome]) -> Result<f64, ScoringError> {
    if outcomes.is_empty() {
        return Err(ScoringError::EmptyPass);
    }

    let y_true: Vec<usize> = outcomes.iter().map(|o| o.true_label).collect();
    let y_pred: Vec<usize> = outcomes.iter().map(|o| o.predicted_label).collect();

    let value = match metric {
        Metric::Accuracy => metrics::accuracy(&y_true, &y_pred),
        Metric::F1Macro => metrics::f1_macro(&y_true, &y_pred),
        Metric::BalancedAccuracy => metrics::balanced_accuracy(&y_true, &y_pred),
        Metric::TrialNll => {
            let mut nll = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                let log_prob = outcome
                    .mean_log_probs
                    .get(outcome.true_label)
                    .copied()
                    .ok_or_else(|| ScoringError::ClassCountMismatch {
                        trial_id: outcome.trial_id.clone(),
                        expected: outcome.true_label + 1,
                        found: outcome.mean_log_probs.len(),
                    })?;
                nll.push(-log_prob);
            }
            nll.mean()
        }
    };
    Ok(value)
}

//! Per-epoch training history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::scoring::{Direction, Score};

/// Everything recorded for one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_loss: Option<f64>,
    pub scores: Vec<Score>,
    pub duration_ms: u64,
}

impl EpochRecord {
    pub fn score(&self, name: &str) -> Option<&Score> {
        self.scores.iter().find(|s| s.name == name)
    }
}

/// Best value of one score over the run.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Best {
    value: f64,
    epoch: usize,
}

/// Ordered epoch records with best-so-far tracking per score name.
#[derive(Debug, Clone, Default)]
pub struct History {
    epochs: Vec<EpochRecord>,
    best: BTreeMap<String, Best>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an epoch, marking each score that beats its previous best.
    pub fn record(&mut self, mut record: EpochRecord) {
        for score in &mut record.scores {
            let improved = match self.best.get(&score.name) {
                None => true,
                Some(best) => score.improves_on(best.value),
            };
            score.is_best = improved;
            if improved {
                self.best.insert(
                    score.name.clone(),
                    Best {
                        value: score.value,
                        epoch: record.epoch,
                    },
                );
            }
        }
        self.epochs.push(record);
    }

    pub fn epochs(&self) -> &[EpochRecord] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Best value and the epoch it was reached in.
    pub fn best(&self, name: &str) -> Option<(f64, usize)> {
        self.best.get(name).map(|b| (b.value, b.epoch))
    }

    /// Direction of a score, as recorded in the first epoch that has it.
    pub fn direction(&self, name: &str) -> Option<Direction> {
        self.epochs
            .iter()
            .find_map(|e| e.score(name))
            .map(|s| s.direction)
    }

    /// Score names in first-seen order.
    pub fn score_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for record in &self.epochs {
            for score in &record.scores {
                if !names.contains(&score.name) {
                    names.push(score.name.clone());
                }
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scoring::Phase;

    fn score(name: &str, value: f64, direction: Direction) -> Score {
        Score {
            name: name.to_string(),
            phase: Phase::Valid,
            value,
            direction,
            n_trials: 10,
            is_best: false,
        }
    }

    fn record(epoch: usize, acc: f64, nll: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 1.0,
            valid_loss: Some(1.2),
            scores: vec![
                score("valid_trial_accuracy", acc, Direction::HigherIsBetter),
                score("valid_trial_nll", nll, Direction::LowerIsBetter),
            ],
            duration_ms: 5,
        }
    }

    #[test]
    fn test_best_follows_direction() {
        let mut history = History::new();
        history.record(record(1, 0.5, 1.0));
        history.record(record(2, 0.7, 1.3));
        history.record(record(3, 0.6, 0.8));

        let flags = |epoch: usize| -> (bool, bool) {
            let e = &history.epochs()[epoch - 1];
            (e.scores[0].is_best, e.scores[1].is_best)
        };
        assert_eq!(flags(1), (true, true));
        assert_eq!(flags(2), (true, false));
        assert_eq!(flags(3), (false, true));

        assert_eq!(history.best("valid_trial_accuracy"), Some((0.7, 2)));
        assert_eq!(history.best("valid_trial_nll"), Some((0.8, 3)));
        assert_eq!(
            history.direction("valid_trial_nll"),
            Some(Direction::LowerIsBetter)
        );
    }

    #[test]
    fn test_ties_do_not_move_best() {
        let mut history = History::new();
        history.record(record(1, 0.5, 1.0));
        history.record(record(2, 0.5, 1.0));
        assert!(!history.epochs()[1].scores[0].is_best);
        assert_eq!(history.best("valid_trial_accuracy"), Some((0.5, 1)));
    }

    #[test]
    fn test_score_names_in_order() {
        let mut history = History::new();
        assert!(history.is_empty());
        history.record(record(1, 0.5, 1.0));
        assert_eq!(
            history.score_names(),
            vec!["valid_trial_accuracy".to_string(), "valid_trial_nll".to_string()]
        );
        assert_eq!(history.len(), 1);
    }
}

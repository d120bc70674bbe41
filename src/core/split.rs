//! Train/validation split strategies.
//!
//! A split consumes the windowed dataset and hands back two disjoint subsets
//! whose union is the input. Ratio splits work on whole trials so the windows
//! of one trial never end up on both sides.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::windowing::{TrialId, Window, WindowsDataset};

/// Attribute of a window's source recording that datasets can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Session,
    Subject,
    Run,
    Recording,
}

impl GroupKey {
    /// Value of this attribute for a window.
    pub fn value_of(&self, window: &Window) -> String {
        match self {
            GroupKey::Session => window.description.session.clone(),
            GroupKey::Subject => window.description.subject.to_string(),
            GroupKey::Run => window.description.run.clone(),
            GroupKey::Recording => window.recording_id.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GroupKey::Session => "session",
            GroupKey::Subject => "subject",
            GroupKey::Run => "run",
            GroupKey::Recording => "recording",
        }
    }
}

impl FromStr for GroupKey {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "session" => Ok(GroupKey::Session),
            "subject" => Ok(GroupKey::Subject),
            "run" => Ok(GroupKey::Run),
            "recording" => Ok(GroupKey::Recording),
            other => Err(SplitError::UnknownKey(other.to_string())),
        }
    }
}

/// Predicate deciding whether a window belongs to the training subset.
pub type SplitPredicate = Arc<dyn Fn(&Window) -> bool + Send + Sync>;

/// The closed set of split strategies.
#[derive(Clone)]
pub enum SplitStrategy {
    /// Exactly two sessions, one per side
    BySession { train: String, valid: String },
    /// Disjoint subject lists
    BySubject { train: Vec<u32>, valid: Vec<u32> },
    /// Random fraction of trials goes to validation
    ByRatio { valid_fraction: f64, seed: u64 },
    /// Windows for which the predicate holds go to training
    Custom {
        name: String,
        predicate: SplitPredicate,
    },
}

impl fmt::Debug for SplitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Training and validation subsets.
#[derive(Debug, Clone, Default)]
pub struct TrainValidSplit {
    pub train: WindowsDataset,
    pub valid: WindowsDataset,
}

impl SplitStrategy {
    /// Build a custom strategy from a predicate.
    pub fn custom<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Window) -> bool + Send + Sync + 'static,
    {
        SplitStrategy::Custom {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Short human-readable description.
    pub fn describe(&self) -> String {
        match self {
            SplitStrategy::BySession { train, valid } => {
                format!("by_session(train={train}, valid={valid})")
            }
            SplitStrategy::BySubject { train, valid } => {
                format!("by_subject(train={train:?}, valid={valid:?})")
            }
            SplitStrategy::ByRatio {
                valid_fraction,
                seed,
            } => format!("by_ratio(valid_fraction={valid_fraction}, seed={seed})"),
            SplitStrategy::Custom { name, .. } => format!("custom({name})"),
        }
    }

    /// Partition a dataset into training and validation subsets.
    pub fn split(&self, dataset: WindowsDataset) -> Result<TrainValidSplit, SplitError> {
        let split = match self {
            SplitStrategy::BySession { train, valid } => {
                split_two_groups(dataset, GroupKey::Session, train, valid)?
            }
            SplitStrategy::BySubject { train, valid } => split_by_subject(dataset, train, valid)?,
            SplitStrategy::ByRatio {
                valid_fraction,
                seed,
            } => split_by_ratio(dataset, *valid_fraction, *seed)?,
            SplitStrategy::Custom { name, predicate } => {
                let (train, valid): (Vec<Window>, Vec<Window>) =
                    dataset.into_windows().into_iter().partition(|w| predicate(w));
                TrainValidSplit {
                    train: WindowsDataset::new(train),
                    valid: WindowsDataset::new(valid),
                }
                .non_empty(&format!("custom({name})"))?
            }
        };

        tracing::info!(
            strategy = %self.describe(),
            train_windows = split.train.len(),
            valid_windows = split.valid.len(),
            "split dataset"
        );
        Ok(split)
    }
}

impl TrainValidSplit {
    fn non_empty(self, strategy: &str) -> Result<Self, SplitError> {
        if self.train.is_empty() {
            return Err(SplitError::EmptySubset {
                strategy: strategy.to_string(),
                side: "train",
            });
        }
        if self.valid.is_empty() {
            return Err(SplitError::EmptySubset {
                strategy: strategy.to_string(),
                side: "valid",
            });
        }
        Ok(self)
    }
}

fn split_two_groups(
    dataset: WindowsDataset,
    key: GroupKey,
    train: &str,
    valid: &str,
) -> Result<TrainValidSplit, SplitError> {
    if train == valid {
        return Err(SplitError::InvalidStrategy(format!(
            "train and valid {} must differ, both are '{train}'",
            key.name()
        )));
    }

    let mut groups = dataset.split_by(key);
    let found: Vec<String> = groups.keys().cloned().collect();
    let unexpected = || SplitError::UnexpectedGroups {
        key: key.name(),
        expected: vec![train.to_string(), valid.to_string()],
        found: found.clone(),
    };

    if groups.len() != 2 {
        return Err(unexpected());
    }
    let train_set = groups.remove(train).ok_or_else(unexpected)?;
    let valid_set = groups.remove(valid).ok_or_else(unexpected)?;

    Ok(TrainValidSplit {
        train: train_set,
        valid: valid_set,
    })
}

fn split_by_subject(
    dataset: WindowsDataset,
    train: &[u32],
    valid: &[u32],
) -> Result<TrainValidSplit, SplitError> {
    if train.is_empty() || valid.is_empty() {
        return Err(SplitError::InvalidStrategy(
            "subject split needs at least one subject on each side".to_string(),
        ));
    }
    if let Some(subject) = train.iter().find(|s| valid.contains(s)) {
        return Err(SplitError::InvalidStrategy(format!(
            "subject {subject} listed for both train and valid"
        )));
    }

    let found: Vec<String> = dataset
        .iter()
        .map(|w| w.description.subject)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let expected: Vec<String> = train.iter().chain(valid).map(|s| s.to_string()).collect();
    if found.iter().any(|s| !expected.contains(s)) {
        return Err(SplitError::UnexpectedGroups {
            key: GroupKey::Subject.name(),
            expected,
            found,
        });
    }

    let (train_set, valid_set): (Vec<Window>, Vec<Window>) = dataset
        .into_windows()
        .into_iter()
        .partition(|w| train.contains(&w.description.subject));

    TrainValidSplit {
        train: WindowsDataset::new(train_set),
        valid: WindowsDataset::new(valid_set),
    }
    .non_empty("by_subject")
}

fn split_by_ratio(
    dataset: WindowsDataset,
    valid_fraction: f64,
    seed: u64,
) -> Result<TrainValidSplit, SplitError> {
    if !(valid_fraction > 0.0 && valid_fraction < 1.0) {
        return Err(SplitError::InvalidStrategy(format!(
            "valid_fraction must lie in (0, 1), got {valid_fraction}"
        )));
    }

    let mut trials: Vec<TrialId> = dataset
        .iter()
        .map(|w| w.trial_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if trials.len() < 2 {
        return Err(SplitError::TooFewTrials(trials.len()));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    trials.shuffle(&mut rng);

    let n_valid = ((trials.len() as f64 * valid_fraction).round() as usize)
        .clamp(1, trials.len() - 1);
    let valid_trials: BTreeSet<TrialId> = trials.into_iter().take(n_valid).collect();

    let (valid_set, train_set): (Vec<Window>, Vec<Window>) = dataset
        .into_windows()
        .into_iter()
        .partition(|w| valid_trials.contains(&w.trial_id));

    Ok(TrainValidSplit {
        train: WindowsDataset::new(train_set),
        valid: WindowsDataset::new(valid_set),
    })
}

/// Serializable form of the split strategies that need no code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SplitConfig {
    BySession {
        train: String,
        valid: String,
    },
    BySubject {
        train: Vec<u32>,
        valid: Vec<u32>,
    },
    ByRatio {
        valid_fraction: f64,
        /// Falls back to the run seed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig::BySession {
            train: "session_T".to_string(),
            valid: "session_E".to_string(),
        }
    }
}

impl SplitConfig {
    /// Turn the configuration into a strategy.
    pub fn to_strategy(&self, run_seed: u64) -> SplitStrategy {
        match self {
            SplitConfig::BySession { train, valid } => SplitStrategy::BySession {
                train: train.clone(),
                valid: valid.clone(),
            },
            SplitConfig::BySubject { train, valid } => SplitStrategy::BySubject {
                train: train.clone(),
                valid: valid.clone(),
            },
            SplitConfig::ByRatio {
                valid_fraction,
                seed,
            } => SplitStrategy::ByRatio {
                valid_fraction: *valid_fraction,
                seed: seed.unwrap_or(run_seed),
            },
        }
    }
}

/// Errors raised when a split cannot produce its two subsets.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("unknown split key '{0}', expected session, subject, run or recording")]
    UnknownKey(String),

    #[error("split by {key} expected groups {expected:?}, found {found:?}")]
    UnexpectedGroups {
        key: &'static str,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{side} subset is empty after split {strategy}")]
    EmptySubset {
        strategy: String,
        side: &'static str,
    },

    #[error("need at least two trials to split by ratio, found {0}")]
    TooFewTrials(usize),

    #[error("invalid split strategy: {0}")]
    InvalidStrategy(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::types::RecordingDescription;

    fn make_window(subject: u32, session: &str, trial: usize, index_in_trial: usize) -> Window {
        let recording_id = format!("sub-{subject}_{session}");
        Window {
            recording_id: recording_id.clone(),
            description: RecordingDescription {
                subject,
                session: session.to_string(),
                run: "run_0".to_string(),
            },
            trial_id: TrialId::new(&recording_id, trial),
            label: trial % 4,
            event_sample: trial * 1000,
            start: (trial * 1000 + index_in_trial) as i64,
            length: 4,
            valid_length: 4,
            index_in_trial,
            data: vec![vec![0.0; 4]],
        }
    }

    /// `n_windows` windows for a session, two per trial.
    fn make_session(subject: u32, session: &str, n_windows: usize) -> Vec<Window> {
        (0..n_windows)
            .map(|i| make_window(subject, session, i / 2, i % 2))
            .collect()
    }

    fn window_keys(dataset: &WindowsDataset) -> BTreeSet<(String, i64)> {
        dataset
            .iter()
            .map(|w| (w.trial_id.0.clone(), w.start))
            .collect()
    }

    #[test]
    fn test_split_by_session_counts() {
        let mut windows = make_session(1, "session_T", 100);
        windows.extend(make_session(1, "session_E", 50));
        let full = WindowsDataset::new(windows);
        let all_keys = window_keys(&full);

        let strategy = SplitConfig::default().to_strategy(0);
        let split = strategy.split(full).unwrap();
        assert_eq!(split.train.len(), 100);
        assert_eq!(split.valid.len(), 50);

        let train_keys = window_keys(&split.train);
        let valid_keys = window_keys(&split.valid);
        assert!(train_keys.is_disjoint(&valid_keys));
        let union: BTreeSet<_> = train_keys.union(&valid_keys).cloned().collect();
        assert_eq!(union, all_keys);
        assert!(split.train.iter().all(|w| w.description.session == "session_T"));
    }

    #[test]
    fn test_split_by_session_wrong_groups() {
        let full = WindowsDataset::new(make_session(1, "session_T", 10));
        let result = SplitConfig::default().to_strategy(0).split(full);
        match result {
            Err(SplitError::UnexpectedGroups { key, found, .. }) => {
                assert_eq!(key, "session");
                assert_eq!(found, vec!["session_T".to_string()]);
            }
            other => panic!("expected UnexpectedGroups, got {other:?}"),
        }

        let mut windows = make_session(1, "session_T", 4);
        windows.extend(make_session(1, "session_E", 4));
        windows.extend(make_session(1, "session_X", 4));
        let result = SplitConfig::default()
            .to_strategy(0)
            .split(WindowsDataset::new(windows));
        assert!(matches!(result, Err(SplitError::UnexpectedGroups { .. })));

        let result = SplitConfig::default()
            .to_strategy(0)
            .split(WindowsDataset::default());
        assert!(matches!(result, Err(SplitError::UnexpectedGroups { .. })));
    }

    #[test]
    fn test_split_by_session_renamed_sessions() {
        let mut windows = make_session(1, "A", 6);
        windows.extend(make_session(1, "B", 4));
        let strategy = SplitStrategy::BySession {
            train: "B".to_string(),
            valid: "A".to_string(),
        };
        let split = strategy.split(WindowsDataset::new(windows)).unwrap();
        assert_eq!(split.train.len(), 4);
        assert_eq!(split.valid.len(), 6);
    }

    #[test]
    fn test_split_by_subject() {
        let mut windows = make_session(1, "session_T", 8);
        windows.extend(make_session(2, "session_T", 6));
        windows.extend(make_session(3, "session_T", 4));
        let strategy = SplitStrategy::BySubject {
            train: vec![1, 2],
            valid: vec![3],
        };
        let split = strategy.split(WindowsDataset::new(windows.clone())).unwrap();
        assert_eq!(split.train.len(), 14);
        assert_eq!(split.valid.len(), 4);

        // subject 3 not accounted for
        let strategy = SplitStrategy::BySubject {
            train: vec![1],
            valid: vec![2],
        };
        assert!(matches!(
            strategy.split(WindowsDataset::new(windows.clone())),
            Err(SplitError::UnexpectedGroups { .. })
        ));

        let overlapping = SplitStrategy::BySubject {
            train: vec![1, 2],
            valid: vec![2, 3],
        };
        assert!(matches!(
            overlapping.split(WindowsDataset::new(windows)),
            Err(SplitError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn test_split_by_ratio_keeps_trials_whole() {
        let windows = make_session(1, "session_T", 40);
        let strategy = SplitStrategy::ByRatio {
            valid_fraction: 0.25,
            seed: 42,
        };
        let split = strategy.split(WindowsDataset::new(windows)).unwrap();
        assert_eq!(split.valid.n_trials(), 5);
        assert_eq!(split.train.n_trials(), 15);
        assert_eq!(split.train.len() + split.valid.len(), 40);

        let train_trials: BTreeSet<_> = split.train.iter().map(|w| w.trial_id.clone()).collect();
        assert!(split.valid.iter().all(|w| !train_trials.contains(&w.trial_id)));
    }

    #[test]
    fn test_split_by_ratio_is_seeded() {
        let run = |seed| {
            let strategy = SplitStrategy::ByRatio {
                valid_fraction: 0.5,
                seed,
            };
            let split = strategy
                .split(WindowsDataset::new(make_session(1, "session_T", 40)))
                .unwrap();
            split
                .valid
                .iter()
                .map(|w| w.trial_id.clone())
                .collect::<BTreeSet<_>>()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_split_by_ratio_invalid_fraction() {
        let strategy = SplitStrategy::ByRatio {
            valid_fraction: 1.0,
            seed: 0,
        };
        let result = strategy.split(WindowsDataset::new(make_session(1, "session_T", 4)));
        assert!(matches!(result, Err(SplitError::InvalidStrategy(_))));
    }

    #[test]
    fn test_custom_predicate() {
        let strategy = SplitStrategy::custom("even trials", |w: &Window| w.event_sample % 2000 == 0);
        let split = strategy
            .split(WindowsDataset::new(make_session(1, "session_T", 8)))
            .unwrap();
        assert_eq!(split.train.len(), 4);
        assert_eq!(split.valid.len(), 4);

        let everything = SplitStrategy::custom("all", |_: &Window| true);
        assert!(matches!(
            everything.split(WindowsDataset::new(make_session(1, "session_T", 8))),
            Err(SplitError::EmptySubset { side: "valid", .. })
        ));
    }

    #[test]
    fn test_group_key_parsing() {
        assert_eq!("Session".parse::<GroupKey>().unwrap(), GroupKey::Session);
        assert_eq!("subject".parse::<GroupKey>().unwrap(), GroupKey::Subject);
        assert!(matches!(
            "site".parse::<GroupKey>(),
            Err(SplitError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_split_config_json() {
        let json = r#"{"strategy":"by_ratio","valid_fraction":0.2}"#;
        let config: SplitConfig = serde_json::from_str(json).unwrap();
        match config.to_strategy(99) {
            SplitStrategy::ByRatio { seed, .. } => assert_eq!(seed, 99),
            other => panic!("unexpected strategy {other:?}"),
        }
    }
}

//! Serializable run report.
//!
//! A report captures what was decoded (dataset and windowing), with which
//! model, how the data was split and the per-epoch trial-level scores. One
//! report is written per run to the export directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::scoring::{Direction, Phase};
use crate::core::windowing::WindowingConfig;
use crate::training::{EpochRecord, History};

/// Report format version.
pub const REPORT_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "eeg-crop-decoder";

/// Producer metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
}

/// Window and trial counts of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub windows: usize,
    pub trials: usize,
}

/// What was loaded and windowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub name: String,
    pub subject_ids: Vec<u32>,
    /// `synthetic` or the directory recordings were read from
    pub source: String,
    pub n_recordings: usize,
    pub n_windows: usize,
    pub n_trials: usize,
    pub sessions: BTreeMap<String, GroupCount>,
}

/// The model and its probed output size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub kind: String,
    pub final_conv_length: usize,
    pub n_chans: usize,
    pub n_classes: usize,
    pub input_time_length: usize,
    pub receptive_field: usize,
    pub n_preds_per_input: usize,
    pub n_parameters: usize,
}

/// Sizes of both sides of the split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub strategy: String,
    pub train_windows: usize,
    pub train_trials: usize,
    pub valid_windows: usize,
    pub valid_trials: usize,
}

/// One scoring callback across the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub phase: Phase,
    pub direction: Direction,
    pub final_value: f64,
    pub best_value: f64,
    pub best_epoch: usize,
}

/// Everything written for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub report_version: String,
    pub producer: Producer,
    pub run_id: String,
    pub started_at_utc: DateTime<Utc>,
    pub finished_at_utc: DateTime<Utc>,
    pub seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windowing: Option<WindowingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitSummary>,
    pub epochs: Vec<EpochRecord>,
    pub metrics: Vec<MetricSummary>,
    pub stopped_early: bool,
}

impl RunReport {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// File name derived from the start time.
    pub fn file_name(&self) -> String {
        format!("run_{}.json", self.started_at_utc.format("%Y%m%dT%H%M%S%.3fZ"))
    }

    /// Write the report as pretty JSON into `dir`.
    pub fn export(&self, dir: &Path) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

/// Builder collecting report sections as a run progresses.
pub struct ReportBuilder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    seed: u64,
    dataset: Option<DatasetSummary>,
    model: Option<ModelSummary>,
    windowing: Option<WindowingConfig>,
    split: Option<SplitSummary>,
}

impl ReportBuilder {
    /// Start a report with a fresh run id.
    pub fn new(seed: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            seed,
            dataset: None,
            model: None,
            windowing: None,
            split: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn dataset(mut self, summary: DatasetSummary) -> Self {
        self.dataset = Some(summary);
        self
    }

    pub fn model(mut self, summary: ModelSummary) -> Self {
        self.model = Some(summary);
        self
    }

    pub fn windowing(mut self, config: WindowingConfig) -> Self {
        self.windowing = Some(config);
        self
    }

    pub fn split(mut self, summary: SplitSummary) -> Self {
        self.split = Some(summary);
        self
    }

    /// Finish the report from the training history.
    pub fn build(self, history: &History, stopped_early: bool) -> RunReport {
        let metrics = summarize_metrics(history);

        RunReport {
            report_version: REPORT_VERSION.to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: crate::VERSION.to_string(),
            },
            run_id: self.run_id.to_string(),
            started_at_utc: self.started_at,
            finished_at_utc: Utc::now(),
            seed: self.seed,
            dataset: self.dataset,
            model: self.model,
            windowing: self.windowing,
            split: self.split,
            epochs: history.epochs().to_vec(),
            metrics,
            stopped_early,
        }
    }
}

fn summarize_metrics(history: &History) -> Vec<MetricSummary> {
    let Some(last) = history.last() else {
        return Vec::new();
    };

    history
        .score_names()
        .into_iter()
        .filter_map(|name| {
            let final_score = last.score(&name)?;
            let (best_value, best_epoch) = history.best(&name)?;
            Some(MetricSummary {
                phase: final_score.phase,
                direction: history.direction(&name)?,
                final_value: final_score.value,
                best_value,
                best_epoch,
                name,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scoring::Score;

    fn score(name: &str, value: f64, direction: Direction) -> Score {
        Score {
            name: name.to_string(),
            phase: Phase::Valid,
            value,
            direction,
            n_trials: 4,
            is_best: false,
        }
    }

    fn history() -> History {
        let mut history = History::new();
        for (epoch, (acc, nll)) in [(0.5, 1.2), (0.75, 1.4), (0.5, 0.9)].into_iter().enumerate() {
            history.record(EpochRecord {
                epoch: epoch + 1,
                train_loss: 1.0,
                valid_loss: Some(1.1),
                scores: vec![
                    score("valid_trial_accuracy", acc, Direction::HigherIsBetter),
                    score("valid_trial_nll", nll, Direction::LowerIsBetter),
                ],
                duration_ms: 1,
            });
        }
        history
    }

    #[test]
    fn test_metric_summary_tracks_best_epoch() {
        let report = ReportBuilder::new(1).build(&history(), false);

        let acc = report.metric("valid_trial_accuracy").unwrap();
        assert_eq!(acc.final_value, 0.5);
        assert_eq!(acc.best_value, 0.75);
        assert_eq!(acc.best_epoch, 2);

        let nll = report.metric("valid_trial_nll").unwrap();
        assert_eq!(nll.direction, Direction::LowerIsBetter);
        assert_eq!(nll.best_epoch, 3);
    }

    #[test]
    fn test_report_serialization() {
        let builder = ReportBuilder::new(20190706);
        let run_id = builder.run_id();
        let report = builder
            .split(SplitSummary {
                strategy: "by_session(train=session_T, valid=session_E)".to_string(),
                train_windows: 10,
                train_trials: 5,
                valid_windows: 10,
                valid_trials: 5,
            })
            .build(&history(), true);

        assert_eq!(report.run_id, run_id.to_string());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["report_version"], "1.0");
        assert_eq!(json["producer"]["name"], "eeg-crop-decoder");
        assert_eq!(json["metrics"][1]["direction"], "lower_is_better");
        assert_eq!(json["stopped_early"], true);
        assert!(json.get("dataset").is_none());
        assert_eq!(json["epochs"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_export_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportBuilder::new(3).build(&history(), false);
        let path = report.export(&dir.path().join("reports")).unwrap();

        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("run_"));
        let loaded = RunReport::load(&path).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert_eq!(loaded.metrics, report.metrics);
    }

    #[test]
    fn test_empty_history() {
        let report = ReportBuilder::new(3).build(&History::new(), false);
        assert!(report.metrics.is_empty());
        assert!(report.epochs.is_empty());
    }
}

//! Configuration for a cropped decoding run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::scoring::{CroppedTrialScoring, Metric, Phase};
use crate::core::split::SplitConfig;
use crate::core::windowing::{RemainderPolicy, WindowingConfig};
use crate::model::ModelConfig;
use crate::training::{OptimizerConfig, TrainingConfig};

/// Directory name used under the platform config and data directories.
pub const APP_DIR: &str = "eeg-crop-decoder";

/// Seed of the reference run.
pub const DEFAULT_SEED: u64 = 20190706;

/// Main configuration for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seeds model initialisation, synthetic data, shuffling and ratio splits
    pub seed: u64,

    pub model: ModelConfig,

    pub dataset: DatasetConfig,

    pub windowing: WindowingSettings,

    pub split: SplitConfig,

    /// Trial-level scoring callbacks, run at the end of their phase
    pub callbacks: Vec<CroppedTrialScoring>,

    pub training: TrainingConfig,

    pub optimizer: OptimizerConfig,

    /// Path for exporting run reports
    pub export_path: PathBuf,

    /// Path for storing the run log
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            seed: DEFAULT_SEED,
            model: ModelConfig::default(),
            dataset: DatasetConfig::default(),
            windowing: WindowingSettings::default(),
            split: SplitConfig::default(),
            callbacks: default_callbacks(),
            training: TrainingConfig::default(),
            optimizer: OptimizerConfig::default(),
            export_path: data_dir.join("reports"),
            data_path: data_dir,
        }
    }
}

/// Train and valid accuracy plus macro F1, all at trial level.
pub fn default_callbacks() -> Vec<CroppedTrialScoring> {
    vec![
        CroppedTrialScoring::new("train_trial_accuracy", Metric::Accuracy, Phase::Train),
        CroppedTrialScoring::new("train_trial_f1_score", Metric::F1Macro, Phase::Train),
        CroppedTrialScoring::new("valid_trial_accuracy", Metric::Accuracy, Phase::Valid),
        CroppedTrialScoring::new("valid_trial_f1_score", Metric::F1Macro, Phase::Valid),
    ]
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Path of the persisted run log.
    pub fn runlog_path(&self) -> PathBuf {
        self.data_path.join("runlog.json")
    }

    /// Reject values no run could start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.subject_ids.is_empty() {
            return Err(ConfigError::Invalid(
                "dataset.subject_ids must not be empty".to_string(),
            ));
        }
        if self.training.epochs == 0 {
            return Err(ConfigError::Invalid("training.epochs must be positive".to_string()));
        }
        if self.training.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "training.batch_size must be positive".to_string(),
            ));
        }
        if !(self.optimizer.lr > 0.0) {
            return Err(ConfigError::Invalid("optimizer.lr must be positive".to_string()));
        }
        if self.optimizer.weight_decay < 0.0 {
            return Err(ConfigError::Invalid(
                "optimizer.weight_decay must not be negative".to_string(),
            ));
        }
        if let Some(stride) = self.windowing.window_stride_samples {
            if stride <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "windowing.window_stride_samples must be positive, got {stride}"
                )));
            }
        }
        let mut names = std::collections::BTreeSet::new();
        for callback in &self.callbacks {
            if !names.insert(callback.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate callback name '{}'",
                    callback.name
                )));
            }
        }
        Ok(())
    }
}

/// Which recordings to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub subject_ids: Vec<u32>,
    /// Directory of stored JSON recordings; synthetic data when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub synthetic: SyntheticSettings,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            name: "BNCI2014001".to_string(),
            subject_ids: vec![1],
            data_dir: None,
            synthetic: SyntheticSettings::default(),
        }
    }
}

/// Size of the generated synthetic dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSettings {
    pub runs_per_session: usize,
    pub trials_per_run: usize,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            runs_per_session: 2,
            trials_per_run: 24,
        }
    }
}

/// Windowing parameters as configured; the stride may be left to the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowingSettings {
    pub trial_start_offset_samples: i64,
    pub trial_stop_offset_samples: i64,
    /// Defaults to the model's input length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size_samples: Option<i64>,
    /// Defaults to the probed number of predictions per input
    #[serde(default)]
    pub window_stride_samples: Option<i64>,
    pub drop_incomplete: bool,
    #[serde(default)]
    pub remainder: RemainderPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<BTreeMap<i32, usize>>,
}

impl Default for WindowingSettings {
    fn default() -> Self {
        Self {
            trial_start_offset_samples: -125,
            trial_stop_offset_samples: 1000,
            window_size_samples: None,
            window_stride_samples: None,
            drop_incomplete: false,
            remainder: RemainderPolicy::AlignToEnd,
            mapping: Some([(1, 0), (2, 1), (3, 2), (4, 3)].into_iter().collect()),
        }
    }
}

impl WindowingSettings {
    /// Fill in the size and stride left unset.
    pub fn resolve(&self, input_time_length: usize, n_preds_per_input: usize) -> WindowingConfig {
        WindowingConfig {
            trial_start_offset_samples: self.trial_start_offset_samples,
            trial_stop_offset_samples: self.trial_stop_offset_samples,
            window_size_samples: self
                .window_size_samples
                .unwrap_or(input_time_length as i64),
            window_stride_samples: self
                .window_stride_samples
                .unwrap_or(n_preds_per_input as i64),
            drop_incomplete: self.drop_incomplete,
            remainder: self.remainder,
            mapping: self.mapping.clone(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

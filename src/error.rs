//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::scoring::ScoringError;
use crate::core::split::SplitError;
use crate::core::windowing::ConfigurationError;
use crate::dataset::DatasetError;
use crate::model::ModelError;
use crate::training::TrainingError;

/// Any error a run can end with.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("windowing error: {0}")]
    Windowing(#[from] ConfigurationError),

    #[error("split error: {0}")]
    Split(#[from] SplitError),

    #[error("scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("training error: {0}")]
    Training(#[from] TrainingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

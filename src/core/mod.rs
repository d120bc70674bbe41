//! Core cropped-decoding functionality.
//!
//! This module contains:
//! - Windowing of trials into fixed-length, strided crops
//! - Train/validation split strategies
//! - Trial-level metrics and cropped trial scoring
//! - Run reports for export

pub mod metrics;
pub mod report;
pub mod scoring;
pub mod split;
pub mod windowing;

// Re-export commonly used types
pub use report::{ReportBuilder, RunReport, PRODUCER_NAME, REPORT_VERSION};
pub use scoring::{
    aggregate_trials, Aggregation, CroppedTrialScoring, Direction, Metric, Phase, Score,
    ScoringError, TrialOutcome, WindowPrediction,
};
pub use split::{GroupKey, SplitConfig, SplitError, SplitStrategy, TrainValidSplit};
pub use windowing::{
    create_windows, create_windows_from_events, ConfigurationError, RemainderPolicy, TrialId,
    Window, WindowingConfig, WindowsDataset,
};

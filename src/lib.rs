//! EEG Crop Decoder - cropped-trial decoding of motor-imagery EEG.
//!
//! A dense-prediction model emits one class prediction per output timestep
//! of an input window. Training on many overlapping crops of each trial and
//! folding the per-timestep predictions back into one label per trial is
//! what this library provides.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       EEG Crop Decoder                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Model     │──▶│  Windowing  │──▶│    Split    │         │
//! │  │  (probe)    │   │ (strided)   │   │ (strategy)  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │         ▲                 ▲                 │                │
//! │         │                 │                 ▼                │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Config    │   │   Dataset   │   │  Training   │         │
//! │  │             │   │  (source)   │   │ + scoring   │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                                             │                │
//! │                                             ▼                │
//! │                    ┌─────────────┐   ┌─────────────┐         │
//! │                    │   Run Log   │◀──│   Report    │         │
//! │                    └─────────────┘   └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use eeg_crop_decoder::{Config, Pipeline};
//!
//! let mut config = Config::default();
//! config.training.epochs = 2;
//!
//! let pipeline = Pipeline::new(config);
//! let report = pipeline.run(None).expect("run failed");
//! for metric in &report.metrics {
//!     println!("{}: {:.3}", metric.name, metric.final_value);
//! }
//! ```

pub mod config;
pub mod core;
pub mod dataset;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod runlog;
pub mod training;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use crate::core::{
    create_windows_from_events, CroppedTrialScoring, RunReport, SplitStrategy, TrialId, Window,
    WindowingConfig, WindowsDataset,
};
pub use dataset::{DatasetSource, Recording, SyntheticSource};
pub use error::{Error, Result};
pub use model::{DenseCropModel, ForwardModel, ModelKind, TrainableModel};
pub use pipeline::{Pipeline, Probe};
pub use runlog::{RunLog, RunStats, SharedRunLog};
pub use training::{Trainer, TrainingError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

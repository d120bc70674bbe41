//! Dataset acquisition.
//!
//! This module provides the recording types and the sources that produce
//! them: a seeded synthetic generator and an on-disk JSON layout.

pub mod json;
pub mod source;
pub mod synthetic;
pub mod types;

// Re-export commonly used types
pub use json::JsonDirectorySource;
pub use source::{dataset_info, DatasetError, DatasetInfo, DatasetSource, BNCI2014001};
pub use synthetic::SyntheticSource;
pub use types::{EventMarker, Recording, RecordingDescription};

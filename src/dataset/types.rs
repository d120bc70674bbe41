//! Recording types for continuous EEG data.
//!
//! A recording is immutable once loaded: the windowing stage only ever reads
//! from it.

use serde::{Deserialize, Serialize};

use crate::dataset::source::DatasetError;

/// Descriptive attributes of a recording, used as split keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordingDescription {
    /// Subject identifier
    pub subject: u32,
    /// Session name (e.g. "session_T")
    pub session: String,
    /// Run name within the session
    pub run: String,
}

/// A labelled event marker in a continuous recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMarker {
    /// Sample index of the event onset
    pub sample: usize,
    /// Raw event code as stored by the dataset
    pub code: i32,
}

impl EventMarker {
    pub fn new(sample: usize, code: i32) -> Self {
        Self { sample, code }
    }
}

/// A continuous multi-channel recording with event annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// Identifier unique within a loaded dataset
    pub id: String,
    pub description: RecordingDescription,
    /// Sampling frequency in Hz
    pub sfreq: f64,
    pub channel_names: Vec<String>,
    /// Signal, channels x samples
    pub data: Vec<Vec<f32>>,
    /// Event markers, in any order
    pub events: Vec<EventMarker>,
}

impl Recording {
    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.data.len()
    }

    /// Number of samples per channel.
    pub fn n_samples(&self) -> usize {
        self.data.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Duration of the recording in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sfreq <= 0.0 {
            return 0.0;
        }
        self.n_samples() as f64 / self.sfreq
    }

    /// Events sorted by onset sample.
    pub fn sorted_events(&self) -> Vec<EventMarker> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.sample);
        events
    }

    /// Check that the recording is well formed.
    ///
    /// Every channel must have the same length, channel names must match the
    /// channel count and every event must fall inside the signal.
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.data.is_empty() {
            return Err(DatasetError::Malformed {
                recording: self.id.clone(),
                reason: "recording has no channels".to_string(),
            });
        }
        if self.sfreq <= 0.0 {
            return Err(DatasetError::Malformed {
                recording: self.id.clone(),
                reason: format!("sampling frequency must be positive, got {}", self.sfreq),
            });
        }

        let n_samples = self.n_samples();
        if let Some((idx, channel)) = self
            .data
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != n_samples)
        {
            return Err(DatasetError::Malformed {
                recording: self.id.clone(),
                reason: format!(
                    "channel {idx} has {} samples, expected {n_samples}",
                    channel.len()
                ),
            });
        }

        if self.channel_names.len() != self.data.len() {
            return Err(DatasetError::Malformed {
                recording: self.id.clone(),
                reason: format!(
                    "{} channel names for {} channels",
                    self.channel_names.len(),
                    self.data.len()
                ),
            });
        }

        if let Some(event) = self.events.iter().find(|e| e.sample >= n_samples) {
            return Err(DatasetError::Malformed {
                recording: self.id.clone(),
                reason: format!(
                    "event at sample {} lies beyond the {n_samples} recorded samples",
                    event.sample
                ),
            });
        }

        Ok(())
    }
}

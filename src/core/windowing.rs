//! Cropping of continuous recordings into fixed-length windows.
//!
//! Every event defines a trial span `[event + start_offset, event + stop_offset)`.
//! Windows of `window_size_samples` are cut from the start of the span and
//! advanced by `window_stride_samples` while they fit. What happens to a
//! leftover tail is decided by [`RemainderPolicy`] unless `drop_incomplete`
//! is set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::split::GroupKey;
use crate::dataset::types::{Recording, RecordingDescription};

/// Identifier of one trial, unique per source event in a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrialId(pub String);

impl TrialId {
    pub fn new(recording_id: &str, event_index: usize) -> Self {
        Self(format!("{recording_id}/{event_index}"))
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a trailing partial window is handled when `drop_incomplete` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// Add one window ending exactly at the trial stop
    #[default]
    AlignToEnd,
    /// Start at the next stride position and fill missing samples with zeros
    ZeroPad,
    /// Start at the next stride position and repeat the last real sample
    EdgePad,
}

/// Windowing parameters, in samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowingConfig {
    pub trial_start_offset_samples: i64,
    pub trial_stop_offset_samples: i64,
    pub window_size_samples: i64,
    pub window_stride_samples: i64,
    pub drop_incomplete: bool,
    #[serde(default)]
    pub remainder: RemainderPolicy,
    /// Event code to class index; unmapped events are skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<BTreeMap<i32, usize>>,
}

impl WindowingConfig {
    /// Length of every trial span.
    pub fn trial_span_samples(&self) -> i64 {
        self.trial_stop_offset_samples - self.trial_start_offset_samples
    }

    /// Check the parameters against each other.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.window_size_samples <= 0 {
            return Err(ConfigurationError::NonPositiveWindowSize(
                self.window_size_samples,
            ));
        }
        if self.window_stride_samples <= 0 {
            return Err(ConfigurationError::NonPositiveStride(
                self.window_stride_samples,
            ));
        }
        let span = self.trial_span_samples();
        if span <= 0 {
            return Err(ConfigurationError::EmptyTrialSpan {
                start_offset: self.trial_start_offset_samples,
                stop_offset: self.trial_stop_offset_samples,
            });
        }
        if self.window_size_samples > span {
            return Err(ConfigurationError::WindowExceedsTrial {
                window: self.window_size_samples,
                span,
            });
        }
        Ok(())
    }

    /// Window placements inside a trial span as `(offset, valid_length)`.
    ///
    /// Offsets are relative to the span start and strictly increasing.
    pub fn window_offsets(&self) -> Result<Vec<(i64, usize)>, ConfigurationError> {
        self.validate()?;

        let span = self.trial_span_samples();
        let size = self.window_size_samples;
        let stride = self.window_stride_samples;

        let mut offsets = Vec::with_capacity(((span - size) / stride + 2) as usize);
        let mut next = 0;
        while next + size <= span {
            offsets.push((next, size as usize));
            next += stride;
        }

        // validate() guarantees at least one full window
        let covered_until = offsets.last().map(|(o, _)| o + size).unwrap_or(0);
        if !self.drop_incomplete && covered_until < span {
            match self.remainder {
                RemainderPolicy::AlignToEnd => offsets.push((span - size, size as usize)),
                RemainderPolicy::ZeroPad | RemainderPolicy::EdgePad => {
                    if next < span {
                        offsets.push((next, (span - next) as usize));
                    }
                }
            }
        }

        Ok(offsets)
    }

    fn label_for(&self, code: i32) -> Option<usize> {
        match &self.mapping {
            Some(mapping) => mapping.get(&code).copied(),
            None => usize::try_from(code).ok(),
        }
    }
}

/// A fixed-length crop of one trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub recording_id: String,
    pub description: RecordingDescription,
    pub trial_id: TrialId,
    pub label: usize,
    /// Sample of the originating event
    pub event_sample: usize,
    /// First sample of the window in the recording
    pub start: i64,
    pub length: usize,
    /// Number of real samples; the rest is padding
    pub valid_length: usize,
    /// Position of this window among the windows of its trial
    pub index_in_trial: usize,
    /// Signal, channels x length
    pub data: Vec<Vec<f32>>,
}

impl Window {
    /// One past the last sample covered by the window.
    pub fn end(&self) -> i64 {
        self.start + self.length as i64
    }

    /// Whether part of the window is padding.
    pub fn is_padded(&self) -> bool {
        self.valid_length < self.length
    }

    /// Leading output timesteps of an `n_timesteps` prediction whose
    /// target sample lies inside the valid part of the window.
    pub fn valid_timesteps(&self, n_timesteps: usize) -> usize {
        (self.valid_length + n_timesteps)
            .saturating_sub(self.length)
            .min(n_timesteps)
    }
}

/// Errors raised by invalid windowing parameters.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("window_size_samples must be positive, got {0}")]
    NonPositiveWindowSize(i64),

    #[error("window_stride_samples must be positive, got {0}")]
    NonPositiveStride(i64),

    #[error("trial span is empty: start offset {start_offset}, stop offset {stop_offset}")]
    EmptyTrialSpan { start_offset: i64, stop_offset: i64 },

    #[error("window_size_samples {window} exceeds the trial span of {span} samples")]
    WindowExceedsTrial { window: i64, span: i64 },

    #[error(
        "trial {trial_id} spans samples [{start}, {stop}) outside recording of {n_samples} samples"
    )]
    TrialOutsideRecording {
        trial_id: TrialId,
        start: i64,
        stop: i64,
        n_samples: usize,
    },

    #[error("event code {code} in recording '{recording}' cannot be used as a class label")]
    InvalidLabel { recording: String, code: i32 },

    #[error("recording id '{recording}' appears more than once")]
    DuplicateRecording { recording: String },
}

/// Cut all windows out of one recording.
///
/// Windows come out ordered by trial, then chronologically within the trial.
pub fn create_windows(
    recording: &Recording,
    config: &WindowingConfig,
) -> Result<Vec<Window>, ConfigurationError> {
    let offsets = config.window_offsets()?;
    let n_samples = recording.n_samples();
    let size = config.window_size_samples as usize;

    let mut windows = Vec::new();
    let mut skipped = 0usize;

    for (event_index, event) in recording.sorted_events().iter().enumerate() {
        let label = match config.label_for(event.code) {
            Some(label) => label,
            None if config.mapping.is_some() => {
                skipped += 1;
                continue;
            }
            None => {
                return Err(ConfigurationError::InvalidLabel {
                    recording: recording.id.clone(),
                    code: event.code,
                })
            }
        };

        let trial_id = TrialId::new(&recording.id, event_index);
        let span_start = event.sample as i64 + config.trial_start_offset_samples;
        let span_stop = event.sample as i64 + config.trial_stop_offset_samples;
        if span_start < 0 || span_stop > n_samples as i64 {
            return Err(ConfigurationError::TrialOutsideRecording {
                trial_id,
                start: span_start,
                stop: span_stop,
                n_samples,
            });
        }

        for (index_in_trial, &(offset, valid_length)) in offsets.iter().enumerate() {
            let start = span_start + offset;
            let first = start as usize;
            let data = recording
                .data
                .iter()
                .map(|channel| {
                    let mut crop = channel[first..first + valid_length].to_vec();
                    if valid_length < size {
                        let fill = match config.remainder {
                            RemainderPolicy::EdgePad => crop.last().copied().unwrap_or(0.0),
                            _ => 0.0,
                        };
                        crop.resize(size, fill);
                    }
                    crop
                })
                .collect();

            windows.push(Window {
                recording_id: recording.id.clone(),
                description: recording.description.clone(),
                trial_id: trial_id.clone(),
                label,
                event_sample: event.sample,
                start,
                length: size,
                valid_length,
                index_in_trial,
                data,
            });
        }
    }

    if skipped > 0 {
        tracing::warn!(
            recording = %recording.id,
            skipped,
            "skipped events with unmapped codes"
        );
    }

    Ok(windows)
}

/// Window every recording and collect the result into one dataset.
pub fn create_windows_from_events(
    recordings: &[Recording],
    config: &WindowingConfig,
) -> Result<WindowsDataset, ConfigurationError> {
    let mut seen = BTreeSet::new();
    if let Some(dup) = recordings.iter().find(|r| !seen.insert(r.id.as_str())) {
        return Err(ConfigurationError::DuplicateRecording {
            recording: dup.id.clone(),
        });
    }

    let mut windows = Vec::new();
    for recording in recordings {
        let mut recording_windows = create_windows(recording, config)?;
        tracing::debug!(
            recording = %recording.id,
            windows = recording_windows.len(),
            "windowed recording"
        );
        windows.append(&mut recording_windows);
    }

    let dataset = WindowsDataset::new(windows);
    tracing::info!(
        recordings = recordings.len(),
        windows = dataset.len(),
        trials = dataset.n_trials(),
        "created windows from events"
    );
    Ok(dataset)
}

/// An ordered collection of windows.
#[derive(Debug, Clone, Default)]
pub struct WindowsDataset {
    windows: Vec<Window>,
}

impl WindowsDataset {
    pub fn new(windows: Vec<Window>) -> Self {
        Self { windows }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Window> {
        self.windows.iter()
    }

    pub fn into_windows(self) -> Vec<Window> {
        self.windows
    }

    /// Number of distinct trials.
    pub fn n_trials(&self) -> usize {
        self.windows
            .iter()
            .map(|w| &w.trial_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Ground-truth label of every trial.
    pub fn trial_labels(&self) -> BTreeMap<TrialId, usize> {
        self.windows
            .iter()
            .map(|w| (w.trial_id.clone(), w.label))
            .collect()
    }

    /// Number of classes implied by the largest label.
    pub fn n_classes(&self) -> usize {
        self.windows.iter().map(|w| w.label + 1).max().unwrap_or(0)
    }

    /// Partition by a grouping attribute, keeping window order in each group.
    pub fn split_by(self, key: GroupKey) -> BTreeMap<String, WindowsDataset> {
        let mut groups: BTreeMap<String, Vec<Window>> = BTreeMap::new();
        for window in self.windows {
            groups.entry(key.value_of(&window)).or_default().push(window);
        }
        groups
            .into_iter()
            .map(|(value, windows)| (value, WindowsDataset::new(windows)))
            .collect()
    }

    /// Window and trial counts for each value of a grouping attribute.
    pub fn counts_by(&self, key: GroupKey) -> BTreeMap<String, (usize, usize)> {
        let mut groups: BTreeMap<String, (usize, BTreeSet<&TrialId>)> = BTreeMap::new();
        for window in &self.windows {
            let entry = groups.entry(key.value_of(window)).or_default();
            entry.0 += 1;
            entry.1.insert(&window.trial_id);
        }
        groups
            .into_iter()
            .map(|(value, (windows, trials))| (value, (windows, trials.len())))
            .collect()
    }
}

impl FromIterator<Window> for WindowsDataset {
    fn from_iter<I: IntoIterator<Item = Window>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a WindowsDataset {
    type Item = &'a Window;
    type IntoIter = std::slice::Iter<'a, Window>;

    fn into_iter(self) -> Self::IntoIter {
        self.windows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::types::EventMarker;

    fn make_config(size: i64, stride: i64, drop_incomplete: bool) -> WindowingConfig {
        WindowingConfig {
            trial_start_offset_samples: -125,
            trial_stop_offset_samples: 1000,
            window_size_samples: size,
            window_stride_samples: stride,
            drop_incomplete,
            remainder: RemainderPolicy::AlignToEnd,
            mapping: None,
        }
    }

    fn make_recording(n_samples: usize, events: Vec<EventMarker>) -> Recording {
        Recording {
            id: "sub-1_session_T_run-0".to_string(),
            description: RecordingDescription {
                subject: 1,
                session: "session_T".to_string(),
                run: "run_0".to_string(),
            },
            sfreq: 250.0,
            channel_names: vec!["C3".to_string(), "C4".to_string()],
            data: vec![
                (0..n_samples).map(|i| i as f32).collect(),
                vec![1.0; n_samples],
            ],
            events,
        }
    }

    #[test]
    fn test_window_count_with_dropped_remainder() {
        let config = make_config(1000, 4, true);
        let offsets = config.window_offsets().unwrap();
        // floor((1125 - 1000) / 4) + 1
        assert_eq!(offsets.len(), 32);
        assert_eq!(offsets.last().unwrap().0, 124);
    }

    #[test]
    fn test_align_to_end_adds_final_window() {
        let config = make_config(1000, 4, false);
        let offsets = config.window_offsets().unwrap();
        assert_eq!(offsets.len(), 33);
        assert_eq!(*offsets.last().unwrap(), (125, 1000));
    }

    #[test]
    fn test_no_remainder_when_stride_divides() {
        let config = make_config(1000, 5, false);
        let offsets = config.window_offsets().unwrap();
        assert_eq!(offsets.len(), 26);
        assert_eq!(offsets.last().unwrap().0, 125);
    }

    #[test]
    fn test_zero_pad_partial_window() {
        let mut config = make_config(1000, 4, false);
        config.remainder = RemainderPolicy::ZeroPad;
        let offsets = config.window_offsets().unwrap();
        assert_eq!(offsets.len(), 33);
        assert_eq!(*offsets.last().unwrap(), (128, 997));

        let rec = make_recording(3000, vec![EventMarker::new(500, 1)]);
        let windows = create_windows(&rec, &config).unwrap();
        let last = windows.last().unwrap();
        assert!(last.is_padded());
        assert_eq!(last.data[0].len(), 1000);
        assert_eq!(last.data[0][996], (500 - 125 + 128 + 996) as f32);
        assert_eq!(last.data[0][997], 0.0);
    }

    #[test]
    fn test_edge_pad_repeats_last_sample() {
        let mut config = make_config(1000, 4, false);
        config.remainder = RemainderPolicy::EdgePad;
        let rec = make_recording(3000, vec![EventMarker::new(500, 1)]);
        let windows = create_windows(&rec, &config).unwrap();
        let last = windows.last().unwrap();
        assert_eq!(last.data[0][999], last.data[0][996]);
    }

    #[test]
    fn test_windows_stay_inside_trial_span() {
        for stride in [1, 3, 7, 50, 125, 200] {
            for drop_incomplete in [true, false] {
                let config = make_config(1000, stride, drop_incomplete);
                let rec = make_recording(
                    6000,
                    vec![EventMarker::new(400, 1), EventMarker::new(3000, 2)],
                );
                let windows = create_windows(&rec, &config).unwrap();
                for w in &windows {
                    let span_start = w.event_sample as i64 - 125;
                    let span_stop = w.event_sample as i64 + 1000;
                    assert!(w.start >= span_start);
                    assert!(w.end() <= span_stop);
                }
            }
        }
    }

    #[test]
    fn test_coverage_gaps_bounded_by_stride() {
        let mut config = make_config(100, 150, true);
        config.trial_start_offset_samples = 0;
        config.trial_stop_offset_samples = 700;
        let offsets = config.window_offsets().unwrap();
        for pair in offsets.windows(2) {
            let gap = pair[1].0 - (pair[0].0 + 100);
            assert!(gap <= 150 - 100);
        }

        // overlapping windows leave no gap at all
        let config = make_config(1000, 4, false);
        let offsets = config.window_offsets().unwrap();
        for pair in offsets.windows(2) {
            assert!(pair[1].0 <= pair[0].0 + 1000);
        }
        assert_eq!(offsets.last().unwrap().0 + 1000, 1125);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            make_config(1000, 0, false).validate(),
            Err(ConfigurationError::NonPositiveStride(0))
        ));
        assert!(matches!(
            make_config(1000, -3, false).validate(),
            Err(ConfigurationError::NonPositiveStride(-3))
        ));
        assert!(matches!(
            make_config(1200, 4, false).validate(),
            Err(ConfigurationError::WindowExceedsTrial { window: 1200, span: 1125 })
        ));
        assert!(matches!(
            make_config(0, 4, false).validate(),
            Err(ConfigurationError::NonPositiveWindowSize(0))
        ));
    }

    #[test]
    fn test_trial_outside_recording() {
        let config = make_config(1000, 100, false);
        let rec = make_recording(1000, vec![EventMarker::new(50, 1)]);
        let result = create_windows(&rec, &config);
        assert!(matches!(
            result,
            Err(ConfigurationError::TrialOutsideRecording { .. })
        ));
    }

    #[test]
    fn test_windows_carry_trial_metadata() {
        let mut config = make_config(1000, 125, false);
        config.mapping = Some([(1, 0), (2, 1)].into_iter().collect());
        let rec = make_recording(
            6000,
            vec![
                EventMarker::new(3000, 2),
                EventMarker::new(400, 1),
                EventMarker::new(4500, 7),
            ],
        );
        let windows = create_windows(&rec, &config).unwrap();

        // event 7 is unmapped and skipped; 2 windows per remaining trial
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].label, 0);
        assert_eq!(windows[0].trial_id, TrialId::new(&rec.id, 0));
        assert_eq!(windows[2].label, 1);
        assert_eq!(windows[2].trial_id, TrialId::new(&rec.id, 1));
        assert_eq!(windows[1].index_in_trial, 1);
        assert!(windows[0].start < windows[1].start);
        assert_eq!(windows[0].data[0][0], 275.0);
    }

    #[test]
    fn test_negative_code_without_mapping() {
        let config = make_config(1000, 100, false);
        let rec = make_recording(3000, vec![EventMarker::new(500, -1)]);
        assert!(matches!(
            create_windows(&rec, &config),
            Err(ConfigurationError::InvalidLabel { code: -1, .. })
        ));
    }

    #[test]
    fn test_dataset_trial_bookkeeping() {
        let config = make_config(1000, 125, false);
        let rec = make_recording(
            6000,
            vec![EventMarker::new(400, 1), EventMarker::new(3000, 3)],
        );
        let dataset = create_windows_from_events(&[rec], &config).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.n_trials(), 2);
        assert_eq!(dataset.n_classes(), 4);

        let labels = dataset.trial_labels();
        assert_eq!(labels.len(), 2);
        assert!(labels.values().any(|&l| l == 3));

        let counts = dataset.counts_by(GroupKey::Session);
        assert_eq!(counts.get("session_T"), Some(&(4, 2)));
    }

    #[test]
    fn test_shared_recording_id_across_subjects_rejected() {
        let config = make_config(1000, 125, false);
        let events = vec![EventMarker::new(400, 1), EventMarker::new(3000, 3)];
        let mut first = make_recording(6000, events.clone());
        first.id = "session_T_run-0".to_string();
        let mut second = make_recording(6000, events);
        second.id = "session_T_run-0".to_string();
        second.description.subject = 2;

        match create_windows_from_events(&[first.clone(), second.clone()], &config) {
            Err(ConfigurationError::DuplicateRecording { recording }) => {
                assert_eq!(recording, "session_T_run-0")
            }
            other => panic!("expected DuplicateRecording, got {other:?}"),
        }

        second.id = "sub-2_session_T_run-0".to_string();
        let dataset = create_windows_from_events(&[first, second], &config).unwrap();
        assert_eq!(dataset.n_trials(), 4);
        assert_eq!(dataset.trial_labels().len(), 4);
    }

    #[test]
    fn test_valid_timesteps_of_padded_window() {
        let config = WindowingConfig {
            remainder: RemainderPolicy::ZeroPad,
            ..make_config(1000, 400, false)
        };
        let rec = make_recording(6000, vec![EventMarker::new(400, 1)]);
        let windows = create_windows(&rec, &config).unwrap();
        let last = windows.last().unwrap();
        assert_eq!(last.valid_length, 725);
        // 500 timesteps predict window samples 500..1000, the first 225 are real
        assert_eq!(last.valid_timesteps(500), 225);
        assert_eq!(last.valid_timesteps(200), 0);
        assert_eq!(windows[0].valid_timesteps(500), 500);
    }
}

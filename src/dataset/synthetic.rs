//! Seeded synthetic motor-imagery recordings.
//!
//! Each trial raises the signal power of the channel group belonging to its
//! class for `active_samples` after the cue, on top of unit-variance noise.
//! Channels are assigned to classes round-robin, so a model that looks at
//! per-channel power can separate the classes.

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use statrs::distribution::Normal;

use crate::dataset::source::{dataset_info, DatasetError, DatasetInfo, DatasetSource};
use crate::dataset::types::{EventMarker, Recording, RecordingDescription};

/// Parameters of the synthetic generator.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    pub seed: u64,
    pub runs_per_session: usize,
    pub trials_per_run: usize,
    /// Samples before the first cue
    pub lead_in_samples: usize,
    /// Samples between consecutive cues
    pub trial_spacing_samples: usize,
    /// Samples after the cue during which the class pattern is present
    pub active_samples: usize,
    /// Amplitude gain applied to the active channel group
    pub modulation: f64,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            seed: 20190706,
            runs_per_session: 2,
            trials_per_run: 24,
            lead_in_samples: 500,
            trial_spacing_samples: 1500,
            active_samples: 1000,
            modulation: 1.0,
        }
    }
}

impl SyntheticSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Set the number of runs per session and trials per run.
    pub fn with_size(mut self, runs_per_session: usize, trials_per_run: usize) -> Self {
        self.runs_per_session = runs_per_session;
        self.trials_per_run = trials_per_run;
        self
    }

    fn recording_seed(&self, subject: u32, session_idx: usize, run: usize) -> u64 {
        self.seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(u64::from(subject) * 1_000_003)
            .wrapping_add(session_idx as u64 * 10_007)
            .wrapping_add(run as u64)
    }

    fn generate(
        &self,
        info: &DatasetInfo,
        subject: u32,
        session_idx: usize,
        run: usize,
    ) -> Result<Recording, DatasetError> {
        let mut rng = StdRng::seed_from_u64(self.recording_seed(subject, session_idx, run));
        let noise = Normal::new(0.0, 1.0)
            .map_err(|e| DatasetError::InvalidParameter(e.to_string()))?;

        let n_classes = info.event_codes.len();
        let n_samples = self.lead_in_samples
            + self.trials_per_run * self.trial_spacing_samples
            + self.lead_in_samples;

        // Balanced labels in random order
        let mut classes: Vec<usize> = (0..self.trials_per_run).map(|i| i % n_classes).collect();
        classes.shuffle(&mut rng);

        let mut data: Vec<Vec<f32>> = (0..info.n_channels)
            .map(|_| {
                (0..n_samples)
                    .map(|_| noise.sample(&mut rng) as f32)
                    .collect()
            })
            .collect();

        let mut events = Vec::with_capacity(self.trials_per_run);
        let gain = (1.0 + self.modulation) as f32;
        for (trial, &class) in classes.iter().enumerate() {
            let onset = self.lead_in_samples + trial * self.trial_spacing_samples;
            events.push(EventMarker::new(onset, info.event_codes[class]));

            let end = (onset + self.active_samples).min(n_samples);
            for (ch, channel) in data.iter_mut().enumerate() {
                if ch % n_classes == class {
                    for sample in &mut channel[onset..end] {
                        *sample *= gain;
                    }
                }
            }
        }

        let session = info.sessions[session_idx].to_string();
        Ok(Recording {
            id: format!("sub-{subject}_{session}_run-{run}"),
            description: RecordingDescription {
                subject,
                session,
                run: format!("run_{run}"),
            },
            sfreq: info.sfreq,
            channel_names: (0..info.n_channels).map(|i| format!("EEG{i:02}")).collect(),
            data,
            events,
        })
    }
}

impl DatasetSource for SyntheticSource {
    fn load(&self, dataset: &str, subject_ids: &[u32]) -> Result<Vec<Recording>, DatasetError> {
        let info = dataset_info(dataset)?;
        info.check_subjects(subject_ids)?;
        if self.trials_per_run == 0 || self.runs_per_session == 0 {
            return Err(DatasetError::InvalidParameter(
                "synthetic source needs at least one run and one trial".to_string(),
            ));
        }
        if self.trial_spacing_samples == 0 {
            return Err(DatasetError::InvalidParameter(
                "trial spacing must be positive".to_string(),
            ));
        }

        let mut recordings = Vec::new();
        for &subject in subject_ids {
            for session_idx in 0..info.sessions.len() {
                for run in 0..self.runs_per_session {
                    recordings.push(self.generate(&info, subject, session_idx, run)?);
                }
            }
        }

        tracing::debug!(
            dataset = info.name,
            recordings = recordings.len(),
            "generated synthetic recordings"
        );
        Ok(recordings)
    }
}

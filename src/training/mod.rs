//! Training loop for cropped decoding.
//!
//! Each epoch runs a training phase over shuffled mini-batches followed by a
//! forward-only validation phase. Predictions of a phase are collected in
//! full before any trial-level callback scores them, since a trial's windows
//! can land in different batches.

pub mod history;
pub mod optimizer;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::scoring::{CroppedTrialScoring, Phase, Score, ScoringError, WindowPrediction};
use crate::core::split::{SplitError, SplitStrategy};
use crate::core::windowing::{TrialId, Window, WindowsDataset};
use crate::model::{ModelError, TrainableModel};

pub use history::{EpochRecord, History};
pub use optimizer::{AdamW, OptimizerConfig};

/// Loop parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
}

fn default_shuffle() -> bool {
    true
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            batch_size: 32,
            shuffle: true,
        }
    }
}

/// Errors raised while fitting.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training subset is empty")]
    EmptyTrainingSet,

    #[error("invalid training parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// What a call to [`Trainer::fit`] produced.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub history: History,
    pub train_windows: usize,
    pub train_trials: usize,
    pub valid_windows: usize,
    pub valid_trials: usize,
    /// Training ended on the stop flag before the configured epoch count
    pub stopped_early: bool,
}

/// Drives a trainable model through split, epochs and scoring callbacks.
pub struct Trainer<M: TrainableModel> {
    model: M,
    optimizer: AdamW,
    config: TrainingConfig,
    split: SplitStrategy,
    callbacks: Vec<CroppedTrialScoring>,
    rng: StdRng,
}

impl<M: TrainableModel> Trainer<M> {
    pub fn new(
        model: M,
        config: TrainingConfig,
        optimizer: OptimizerConfig,
        split: SplitStrategy,
        callbacks: Vec<CroppedTrialScoring>,
        seed: u64,
    ) -> Self {
        let optimizer = AdamW::new(optimizer, model.parameters().len());
        Self {
            model,
            optimizer,
            config,
            split,
            callbacks,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn callbacks(&self) -> &[CroppedTrialScoring] {
        &self.callbacks
    }

    /// Split the dataset and train for the configured number of epochs.
    ///
    /// A set `stop` flag ends training once the running epoch is recorded.
    pub fn fit(
        &mut self,
        dataset: WindowsDataset,
        stop: Option<&AtomicBool>,
    ) -> Result<FitOutcome, TrainingError> {
        if self.config.epochs == 0 {
            return Err(TrainingError::InvalidParameter(
                "epochs must be positive".to_string(),
            ));
        }
        if self.config.batch_size == 0 {
            return Err(TrainingError::InvalidParameter(
                "batch_size must be positive".to_string(),
            ));
        }

        let split = self.split.split(dataset)?;
        if split.train.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }

        let train_truth = split.train.trial_labels();
        let valid_truth = split.valid.trial_labels();
        let mut history = History::new();
        let mut stopped_early = false;

        for epoch in 1..=self.config.epochs {
            let started = Instant::now();

            let (train_loss, train_preds) = self.train_epoch(&split.train)?;
            let mut scores = self.run_callbacks(Phase::Train, &train_preds, &train_truth)?;

            let valid_loss = if split.valid.is_empty() {
                None
            } else {
                let (loss, valid_preds) = self.evaluate(&split.valid)?;
                scores.extend(self.run_callbacks(Phase::Valid, &valid_preds, &valid_truth)?);
                Some(loss)
            };

            let record = EpochRecord {
                epoch,
                train_loss,
                valid_loss,
                scores,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            log_epoch(&record);
            history.record(record);

            if epoch < self.config.epochs && stop.is_some_and(|s| s.load(Ordering::SeqCst)) {
                warn!(epoch, "stop requested, ending training");
                stopped_early = true;
                break;
            }
        }

        Ok(FitOutcome {
            history,
            train_windows: split.train.len(),
            train_trials: train_truth.len(),
            valid_windows: split.valid.len(),
            valid_trials: valid_truth.len(),
            stopped_early,
        })
    }

    fn train_epoch(
        &mut self,
        train: &WindowsDataset,
    ) -> Result<(f64, Vec<WindowPrediction>), TrainingError> {
        let windows = train.windows();
        let mut order: Vec<usize> = (0..windows.len()).collect();
        if self.config.shuffle {
            order.shuffle(&mut self.rng);
        }

        let mut total_loss = 0.0;
        let mut predictions = Vec::with_capacity(windows.len());

        for (batch_index, chunk) in order.chunks(self.config.batch_size).enumerate() {
            let batch: Vec<&Window> = chunk.iter().map(|&i| &windows[i]).collect();
            let output = self.model.loss_and_gradient(&batch)?;
            self.optimizer
                .step(self.model.parameters_mut(), &output.gradient);

            debug!(batch = batch_index, size = batch.len(), loss = output.loss, "train batch");
            total_loss += output.loss * batch.len() as f64;

            for (window, log_probs) in batch.iter().zip(output.log_probs) {
                predictions.push(WindowPrediction::from_window(window, log_probs));
            }
        }

        Ok((total_loss / windows.len() as f64, predictions))
    }

    /// Forward-only pass returning the cropped NLL and all predictions.
    fn evaluate(
        &self,
        dataset: &WindowsDataset,
    ) -> Result<(f64, Vec<WindowPrediction>), TrainingError> {
        let mut total_loss = 0.0;
        let mut scored = 0usize;
        let mut predictions = Vec::with_capacity(dataset.len());

        for window in dataset.iter() {
            let log_probs = self.model.forward(&window.data)?;
            let n_valid = window.valid_timesteps(log_probs.len());
            if n_valid > 0 {
                total_loss += cropped_nll(&log_probs[..n_valid], window.label)?;
                scored += 1;
            }
            predictions.push(WindowPrediction::from_window(window, log_probs));
        }

        Ok((total_loss / scored.max(1) as f64, predictions))
    }

    fn run_callbacks(
        &self,
        phase: Phase,
        predictions: &[WindowPrediction],
        truth: &BTreeMap<TrialId, usize>,
    ) -> Result<Vec<Score>, TrainingError> {
        let mut scores = Vec::new();
        for callback in self.callbacks.iter().filter(|c| c.phase == phase) {
            scores.push(callback.score(predictions, truth)?);
        }
        Ok(scores)
    }
}

/// Mean over timesteps of the negative log-probability of `label`.
pub fn cropped_nll(log_probs: &[Vec<f64>], label: usize) -> Result<f64, ModelError> {
    if log_probs.is_empty() {
        return Err(ModelError::EmptyBatch);
    }
    let mut total = 0.0;
    for timestep in log_probs {
        let lp = timestep.get(label).ok_or(ModelError::InvalidLabel {
            label,
            n_classes: timestep.len(),
        })?;
        total -= lp;
    }
    Ok(total / log_probs.len() as f64)
}

fn log_epoch(record: &EpochRecord) {
    let scores: Vec<String> = record
        .scores
        .iter()
        .map(|s| format!("{}={:.4}", s.name, s.value))
        .collect();
    info!(
        epoch = record.epoch,
        train_loss = record.train_loss,
        valid_loss = ?record.valid_loss,
        duration_ms = record.duration_ms,
        scores = %scores.join(" "),
        "epoch finished"
    );
}

//! Models producing dense (cropped) predictions.
//!
//! A dense-prediction model maps a channels x time input to one class
//! log-probability vector per output timestep. The number of timesteps per
//! input is what the windowing stride has to be set to, so it is probed with
//! a forward pass on a dummy input before the dataset is windowed.

pub mod dense;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::windowing::Window;

pub use dense::DenseCropModel;

/// Anything exposing a forward pass over one input window.
pub trait ForwardModel {
    fn n_chans(&self) -> usize;

    fn n_classes(&self) -> usize;

    /// Number of input samples each output timestep depends on.
    fn receptive_field(&self) -> usize;

    /// Map a channels x time input to timesteps x classes log-probabilities.
    fn forward(&self, input: &[Vec<f32>]) -> Result<Vec<Vec<f64>>, ModelError>;

    /// Output timesteps produced for an input of `input_time_length` samples.
    ///
    /// Runs one forward pass on an all-ones input.
    fn n_preds_per_input(&self, input_time_length: usize) -> Result<usize, ModelError> {
        let dummy = vec![vec![1.0f32; input_time_length]; self.n_chans()];
        Ok(self.forward(&dummy)?.len())
    }
}

/// Output of one training step over a batch.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Cropped negative log-likelihood, averaged over timesteps then windows
    pub loss: f64,
    /// Gradient of the loss w.r.t. [`TrainableModel::parameters`]
    pub gradient: Vec<f64>,
    /// Per-window timesteps x classes log-probabilities
    pub log_probs: Vec<Vec<Vec<f64>>>,
}

/// A model whose flat parameter vector can be optimised.
pub trait TrainableModel: ForwardModel {
    fn parameters(&self) -> &[f64];

    fn parameters_mut(&mut self) -> &mut [f64];

    fn loss_and_gradient(&self, batch: &[&Window]) -> Result<BatchOutput, ModelError>;
}

/// The two architecture families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Shallow filter-bank network
    Shallow,
    /// Four-block deep network
    Deep,
}

impl ModelKind {
    /// Final convolution length used when none is configured.
    pub fn default_final_conv_length(&self) -> usize {
        match self {
            ModelKind::Shallow => 30,
            ModelKind::Deep => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Shallow => "shallow",
            ModelKind::Deep => "deep",
        }
    }
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "shallow" => Ok(ModelKind::Shallow),
            "deep" => Ok(ModelKind::Deep),
            other => Err(ModelError::UnknownModel(other.to_string())),
        }
    }
}

/// One temporal layer after pooling strides were turned into dilations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemporalLayer {
    pub name: &'static str,
    pub kernel: usize,
    pub dilation: usize,
}

impl TemporalLayer {
    const fn new(name: &'static str, kernel: usize, dilation: usize) -> Self {
        Self {
            name,
            kernel,
            dilation,
        }
    }

    /// Samples this layer adds to the receptive field.
    pub fn span(&self) -> usize {
        (self.kernel - 1) * self.dilation
    }
}

/// Temporal structure of a dense-prediction network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Architecture {
    pub kind: ModelKind,
    pub layers: Vec<TemporalLayer>,
}

impl Architecture {
    /// Temporal layers of a model kind.
    ///
    /// In dense mode every pooling stride is removed and the layers after it
    /// are dilated by that stride instead.
    pub fn new(kind: ModelKind, final_conv_length: usize) -> Result<Self, ModelError> {
        if final_conv_length == 0 {
            return Err(ModelError::InvalidParameter(
                "final_conv_length must be positive".to_string(),
            ));
        }

        let layers = match kind {
            ModelKind::Shallow => vec![
                TemporalLayer::new("conv_time", 25, 1),
                TemporalLayer::new("pool", 75, 1),
                TemporalLayer::new("conv_classifier", final_conv_length, 15),
            ],
            ModelKind::Deep => vec![
                TemporalLayer::new("conv_time", 10, 1),
                TemporalLayer::new("pool_1", 3, 1),
                TemporalLayer::new("conv_2", 10, 3),
                TemporalLayer::new("pool_2", 3, 3),
                TemporalLayer::new("conv_3", 10, 9),
                TemporalLayer::new("pool_3", 3, 9),
                TemporalLayer::new("conv_4", 10, 27),
                TemporalLayer::new("pool_4", 3, 27),
                TemporalLayer::new("conv_classifier", final_conv_length, 81),
            ],
        };
        Ok(Self { kind, layers })
    }

    pub fn receptive_field(&self) -> usize {
        1 + self.layers.iter().map(TemporalLayer::span).sum::<usize>()
    }

    /// Output timesteps for an input length, if the input is long enough.
    pub fn n_outputs(&self, input_time_length: usize) -> Option<usize> {
        let rf = self.receptive_field();
        (input_time_length >= rf).then(|| input_time_length - rf + 1)
    }
}

/// Model selection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// Falls back to the kind's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_conv_length: Option<usize>,
    pub n_chans: usize,
    pub n_classes: usize,
    pub input_time_length: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Shallow,
            final_conv_length: None,
            n_chans: 22,
            n_classes: 4,
            input_time_length: 1000,
        }
    }
}

impl ModelConfig {
    pub fn architecture(&self) -> Result<Architecture, ModelError> {
        Architecture::new(
            self.kind,
            self.final_conv_length
                .unwrap_or_else(|| self.kind.default_final_conv_length()),
        )
    }
}

/// Errors raised by models.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown model '{0}', expected shallow or deep")]
    UnknownModel(String),

    #[error("input has {found} channels, model expects {expected}")]
    ChannelMismatch { expected: usize, found: usize },

    #[error("input of {length} samples is shorter than the receptive field of {receptive_field}")]
    InputTooShort {
        length: usize,
        receptive_field: usize,
    },

    #[error("label {label} out of range for {n_classes} classes")]
    InvalidLabel { label: usize, n_classes: usize },

    #[error("empty batch")]
    EmptyBatch,

    #[error("invalid model parameter: {0}")]
    InvalidParameter(String),
}

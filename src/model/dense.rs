//! Reference dense-prediction model.
//!
//! For every output timestep the model takes the receptive field ending at
//! that timestep, computes the log mean power of each channel (square, mean,
//! log) and feeds the resulting channel vector through a linear layer and a
//! log-softmax. Only the linear layer is learned.

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Normal;

use crate::core::windowing::Window;
use crate::model::{
    Architecture, BatchOutput, ForwardModel, ModelConfig, ModelError, TrainableModel,
};

/// Floor added to the mean power before taking the log.
const POWER_EPS: f64 = 1e-6;

/// Log band-power features with a linear classification head.
#[derive(Debug, Clone)]
pub struct DenseCropModel {
    architecture: Architecture,
    n_chans: usize,
    n_classes: usize,
    /// Row-major `n_classes x n_chans` weights followed by `n_classes` biases
    params: Vec<f64>,
}

impl DenseCropModel {
    /// Build a model with weights drawn from a seeded normal distribution.
    pub fn new(config: &ModelConfig, seed: u64) -> Result<Self, ModelError> {
        if config.n_chans == 0 || config.n_classes < 2 {
            return Err(ModelError::InvalidParameter(format!(
                "need at least one channel and two classes, got {} and {}",
                config.n_chans, config.n_classes
            )));
        }
        let architecture = config.architecture()?;

        let std = 1.0 / (config.n_chans as f64).sqrt();
        let init = Normal::new(0.0, std).map_err(|e| ModelError::InvalidParameter(e.to_string()))?;
        let mut rng = StdRng::seed_from_u64(seed);

        let n_weights = config.n_classes * config.n_chans;
        let mut params: Vec<f64> = (0..n_weights).map(|_| init.sample(&mut rng)).collect();
        params.extend(std::iter::repeat(0.0).take(config.n_classes));

        Ok(Self {
            architecture,
            n_chans: config.n_chans,
            n_classes: config.n_classes,
            params,
        })
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    fn weight(&self, class: usize, chan: usize) -> f64 {
        self.params[class * self.n_chans + chan]
    }

    fn bias(&self, class: usize) -> f64 {
        self.params[self.n_classes * self.n_chans + class]
    }

    /// Log mean power per channel for every output timestep.
    fn features(&self, input: &[Vec<f32>]) -> Result<Vec<Vec<f64>>, ModelError> {
        if input.len() != self.n_chans {
            return Err(ModelError::ChannelMismatch {
                expected: self.n_chans,
                found: input.len(),
            });
        }
        let length = input.first().map(|c| c.len()).unwrap_or(0);
        let rf = self.architecture.receptive_field();
        let n_out = self
            .architecture
            .n_outputs(length)
            .ok_or(ModelError::InputTooShort {
                length,
                receptive_field: rf,
            })?;

        // prefix sums of squares, one row per channel
        let prefix: Vec<Vec<f64>> = input
            .iter()
            .map(|channel| {
                let mut sums = Vec::with_capacity(channel.len() + 1);
                sums.push(0.0);
                let mut acc = 0.0;
                for &x in channel {
                    acc += f64::from(x) * f64::from(x);
                    sums.push(acc);
                }
                sums
            })
            .collect();

        let features: Vec<Vec<f64>> = (0..n_out)
            .map(|t| {
                prefix
                    .iter()
                    .map(|sums| ((sums[t + rf] - sums[t]) / rf as f64 + POWER_EPS).ln())
                    .collect()
            })
            .collect();
        Ok(features)
    }

    fn log_softmax(&self, features: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = (0..self.n_classes)
            .map(|k| {
                self.bias(k)
                    + features
                        .iter()
                        .enumerate()
                        .map(|(c, f)| self.weight(k, c) * f)
                        .sum::<f64>()
            })
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let log_norm = max + logits.iter().map(|l| (l - max).exp()).sum::<f64>().ln();
        logits.into_iter().map(|l| l - log_norm).collect()
    }
}

impl ForwardModel for DenseCropModel {
    fn n_chans(&self) -> usize {
        self.n_chans
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn receptive_field(&self) -> usize {
        self.architecture.receptive_field()
    }

    fn forward(&self, input: &[Vec<f32>]) -> Result<Vec<Vec<f64>>, ModelError> {
        Ok(self
            .features(input)?
            .iter()
            .map(|f| self.log_softmax(f))
            .collect())
    }
}

impl TrainableModel for DenseCropModel {
    fn parameters(&self) -> &[f64] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [f64] {
        &mut self.params
    }

    fn loss_and_gradient(&self, batch: &[&Window]) -> Result<BatchOutput, ModelError> {
        if batch.is_empty() {
            return Err(ModelError::EmptyBatch);
        }

        let bias_offset = self.n_classes * self.n_chans;
        let mut gradient = vec![0.0; self.params.len()];
        let mut loss = 0.0;
        let mut batch_log_probs = Vec::with_capacity(batch.len());
        let mut contributing = 0usize;

        for window in batch {
            if window.label >= self.n_classes {
                return Err(ModelError::InvalidLabel {
                    label: window.label,
                    n_classes: self.n_classes,
                });
            }

            let features = self.features(&window.data)?;
            let n_valid = window.valid_timesteps(features.len());
            if n_valid > 0 {
                contributing += 1;
            }
            let mut window_log_probs = Vec::with_capacity(features.len());

            for (t, f) in features.iter().enumerate() {
                let log_probs = self.log_softmax(f);
                // timesteps predicting padded samples carry no loss
                if t < n_valid {
                    let scale = 1.0 / n_valid as f64;
                    loss -= log_probs[window.label] * scale;

                    for (k, lp) in log_probs.iter().enumerate() {
                        let target = if k == window.label { 1.0 } else { 0.0 };
                        let delta = (lp.exp() - target) * scale;
                        for (c, fc) in f.iter().enumerate() {
                            gradient[k * self.n_chans + c] += delta * fc;
                        }
                        gradient[bias_offset + k] += delta;
                    }
                }
                window_log_probs.push(log_probs);
            }
            batch_log_probs.push(window_log_probs);
        }

        if contributing > 0 {
            let scale = 1.0 / contributing as f64;
            loss *= scale;
            gradient.iter_mut().for_each(|g| *g *= scale);
        }

        Ok(BatchOutput {
            loss,
            gradient,
            log_probs: batch_log_probs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::windowing::TrialId;
    use crate::dataset::types::RecordingDescription;
    use crate::model::ModelKind;

    fn small_config() -> ModelConfig {
        ModelConfig {
            kind: ModelKind::Shallow,
            final_conv_length: Some(1),
            n_chans: 2,
            n_classes: 2,
            input_time_length: 150,
        }
    }

    fn make_window(label: usize, loud_channel: usize) -> Window {
        let data = (0..2)
            .map(|ch| {
                let amp = if ch == loud_channel { 3.0 } else { 1.0 };
                (0..150)
                    .map(|i| if i % 2 == 0 { amp } else { -amp })
                    .collect()
            })
            .collect();
        Window {
            recording_id: "rec".to_string(),
            description: RecordingDescription {
                subject: 1,
                session: "session_T".to_string(),
                run: "run_0".to_string(),
            },
            trial_id: TrialId::new("rec", label),
            label,
            event_sample: 0,
            start: 0,
            length: 150,
            valid_length: 150,
            index_in_trial: 0,
            data,
        }
    }

    #[test]
    fn test_probe_matches_architecture() {
        let model = DenseCropModel::new(&ModelConfig::default(), 1).unwrap();
        assert_eq!(model.n_preds_per_input(1000).unwrap(), 467);

        let deep = ModelConfig {
            kind: ModelKind::Deep,
            ..ModelConfig::default()
        };
        let model = DenseCropModel::new(&deep, 1).unwrap();
        assert_eq!(model.n_preds_per_input(1000).unwrap(), 479);
    }

    #[test]
    fn test_forward_outputs_log_probabilities() {
        let model = DenseCropModel::new(&small_config(), 3).unwrap();
        let window = make_window(0, 0);
        let out = model.forward(&window.data).unwrap();
        // receptive field 99 -> 52 timesteps
        assert_eq!(out.len(), 52);
        for log_probs in &out {
            let total: f64 = log_probs.iter().map(|lp| lp.exp()).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_forward_rejects_bad_input() {
        let model = DenseCropModel::new(&small_config(), 3).unwrap();
        assert!(matches!(
            model.forward(&[vec![0.0; 150]]),
            Err(ModelError::ChannelMismatch { expected: 2, found: 1 })
        ));
        assert!(matches!(
            model.forward(&[vec![0.0; 50], vec![0.0; 50]]),
            Err(ModelError::InputTooShort { .. })
        ));
    }

    #[test]
    fn test_seeded_initialisation() {
        let a = DenseCropModel::new(&small_config(), 11).unwrap();
        let b = DenseCropModel::new(&small_config(), 11).unwrap();
        let c = DenseCropModel::new(&small_config(), 12).unwrap();
        assert_eq!(a.parameters(), b.parameters());
        assert_ne!(a.parameters(), c.parameters());
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let model = DenseCropModel::new(&small_config(), 5).unwrap();
        let w0 = make_window(0, 0);
        let w1 = make_window(1, 1);
        let batch = [&w0, &w1];
        let output = model.loss_and_gradient(&batch).unwrap();

        let h = 1e-6;
        for i in 0..model.parameters().len() {
            let mut shifted = model.clone();
            shifted.parameters_mut()[i] += h;
            let loss = shifted.loss_and_gradient(&batch).unwrap().loss;
            let numeric = (loss - output.loss) / h;
            assert!(
                (numeric - output.gradient[i]).abs() < 1e-4,
                "parameter {i}: numeric {numeric}, analytic {}",
                output.gradient[i]
            );
        }
    }

    #[test]
    fn test_invalid_label() {
        let model = DenseCropModel::new(&small_config(), 5).unwrap();
        let window = make_window(3, 0);
        assert!(matches!(
            model.loss_and_gradient(&[&window]),
            Err(ModelError::InvalidLabel { label: 3, .. })
        ));
    }

    #[test]
    fn test_padded_timesteps_carry_no_loss() {
        let model = DenseCropModel::new(&small_config(), 5).unwrap();
        let mut padded = make_window(0, 0);
        padded.valid_length = 100;
        for channel in &mut padded.data {
            channel[100..].iter_mut().for_each(|v| *v = 0.0);
        }

        // 52 timesteps predict samples 98..150, only 98 and 99 are real
        let log_probs = model.forward(&padded.data).unwrap();
        let expected = crate::training::cropped_nll(&log_probs[..2], 0).unwrap();
        let output = model.loss_and_gradient(&[&padded]).unwrap();
        assert!((output.loss - expected).abs() < 1e-12);
        assert_eq!(output.log_probs[0].len(), 52);

        // a window with no real target samples leaves the batch loss unchanged
        let mut all_padding = make_window(1, 1);
        all_padding.valid_length = 98;
        let w0 = make_window(0, 0);
        let alone = model.loss_and_gradient(&[&w0]).unwrap();
        let mixed = model.loss_and_gradient(&[&w0, &all_padding]).unwrap();
        assert!((alone.loss - mixed.loss).abs() < 1e-12);
        assert_eq!(alone.gradient, mixed.gradient);
    }
}

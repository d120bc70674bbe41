//! End-to-end cropped decoding run.
//!
//! The stages run in a fixed order:
//!
//! 1. build the model
//! 2. probe how many predictions it makes per input window
//! 3. load the recordings
//! 4. cut trials into windows, striding by the probed prediction count
//! 5. split into training and validation subsets
//! 6. attach the trial-level scoring callbacks
//! 7. fit and collect the report

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use tracing::info;

use crate::config::Config;
use crate::core::report::{
    DatasetSummary, GroupCount, ModelSummary, ReportBuilder, RunReport, SplitSummary,
};
use crate::core::scoring::Phase;
use crate::core::split::GroupKey;
use crate::core::windowing::{create_windows_from_events, WindowingConfig, WindowsDataset};
use crate::dataset::{DatasetSource, JsonDirectorySource, Recording, SyntheticSource};
use crate::error::Result;
use crate::model::{DenseCropModel, ForwardModel, ModelError, TrainableModel};
use crate::runlog::SharedRunLog;
use crate::training::{FitOutcome, Trainer};

/// Output geometry of a model for the configured input length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub input_time_length: usize,
    pub receptive_field: usize,
    pub n_preds_per_input: usize,
}

/// Everything built before training starts.
#[derive(Debug)]
pub struct Prepared {
    pub model: DenseCropModel,
    pub probe: Probe,
    pub n_recordings: usize,
    pub windowing: WindowingConfig,
    pub dataset: WindowsDataset,
}

/// A configured run.
pub struct Pipeline {
    config: Config,
    runlog: Option<SharedRunLog>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runlog: None,
        }
    }

    /// Count processed items into a run log.
    pub fn with_runlog(mut self, runlog: SharedRunLog) -> Self {
        self.runlog = Some(runlog);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stage 1: the seeded model.
    pub fn build_model(&self) -> Result<DenseCropModel> {
        Ok(DenseCropModel::new(&self.config.model, self.config.seed)?)
    }

    /// Stage 2: forward a dummy input to count output timesteps.
    pub fn probe<M: ForwardModel>(&self, model: &M) -> Result<Probe> {
        let input_time_length = self.config.model.input_time_length;
        let n_preds_per_input = model.n_preds_per_input(input_time_length)?;
        info!(
            input_time_length,
            receptive_field = model.receptive_field(),
            n_preds_per_input,
            "probed model output"
        );
        Ok(Probe {
            input_time_length,
            receptive_field: model.receptive_field(),
            n_preds_per_input,
        })
    }

    /// The configured source: stored recordings if a directory is set,
    /// synthetic ones otherwise.
    pub fn source(&self) -> Box<dyn DatasetSource> {
        match &self.config.dataset.data_dir {
            Some(dir) => Box::new(JsonDirectorySource::new(dir.clone())),
            None => {
                let synthetic = &self.config.dataset.synthetic;
                Box::new(
                    SyntheticSource::new(self.config.seed)
                        .with_size(synthetic.runs_per_session, synthetic.trials_per_run),
                )
            }
        }
    }

    fn source_name(&self) -> String {
        match &self.config.dataset.data_dir {
            Some(dir) => dir.display().to_string(),
            None => "synthetic".to_string(),
        }
    }

    /// Stage 3: load and check the recordings.
    pub fn load_recordings(&self, source: &dyn DatasetSource) -> Result<Vec<Recording>> {
        let dataset = &self.config.dataset;
        let recordings = source.load(&dataset.name, &dataset.subject_ids)?;

        if let Some(bad) = recordings
            .iter()
            .find(|r| r.n_channels() != self.config.model.n_chans)
        {
            return Err(ModelError::ChannelMismatch {
                expected: self.config.model.n_chans,
                found: bad.n_channels(),
            }
            .into());
        }

        info!(
            dataset = %dataset.name,
            subjects = ?dataset.subject_ids,
            recordings = recordings.len(),
            "loaded recordings"
        );
        if let Some(log) = &self.runlog {
            log.record_recordings_loaded(recordings.len() as u64);
        }
        Ok(recordings)
    }

    /// Stages 1 to 4.
    pub fn prepare(&self, source: &dyn DatasetSource) -> Result<Prepared> {
        let model = self.build_model()?;
        let probe = self.probe(&model)?;
        let recordings = self.load_recordings(source)?;

        let windowing = self
            .config
            .windowing
            .resolve(probe.input_time_length, probe.n_preds_per_input);
        let dataset = create_windows_from_events(&recordings, &windowing)?;
        if let Some(log) = &self.runlog {
            log.record_windows_created(dataset.len() as u64);
        }

        Ok(Prepared {
            model,
            probe,
            n_recordings: recordings.len(),
            windowing,
            dataset,
        })
    }

    /// Run with the configured source.
    pub fn run(&self, stop: Option<&AtomicBool>) -> Result<RunReport> {
        let source = self.source();
        self.run_with_source(source.as_ref(), stop)
    }

    /// Run every stage against `source` and build the report.
    pub fn run_with_source(
        &self,
        source: &dyn DatasetSource,
        stop: Option<&AtomicBool>,
    ) -> Result<RunReport> {
        let builder = ReportBuilder::new(self.config.seed);
        info!(run_id = %builder.run_id(), "starting run");

        let prepared = self.prepare(source)?;
        let dataset_summary = self.dataset_summary(&prepared);
        let model_summary = self.model_summary(&prepared)?;

        let strategy = self.config.split.to_strategy(self.config.seed);
        let description = strategy.describe();
        let mut trainer = Trainer::new(
            prepared.model,
            self.config.training.clone(),
            self.config.optimizer.clone(),
            strategy,
            self.config.callbacks.clone(),
            self.config.seed,
        );
        let outcome = trainer.fit(prepared.dataset, stop)?;
        self.record_fit(&outcome);

        let split_summary = SplitSummary {
            strategy: description,
            train_windows: outcome.train_windows,
            train_trials: outcome.train_trials,
            valid_windows: outcome.valid_windows,
            valid_trials: outcome.valid_trials,
        };

        let report = builder
            .dataset(dataset_summary)
            .model(model_summary)
            .windowing(prepared.windowing)
            .split(split_summary)
            .build(&outcome.history, outcome.stopped_early);

        info!(
            run_id = %report.run_id,
            epochs = report.epochs.len(),
            stopped_early = report.stopped_early,
            "run finished"
        );
        Ok(report)
    }

    /// Write a report to the export directory.
    pub fn export(&self, report: &RunReport) -> Result<PathBuf> {
        let path = report.export(&self.config.export_path)?;
        if let Some(log) = &self.runlog {
            log.record_report_exported();
        }
        info!(path = %path.display(), "exported report");
        Ok(path)
    }

    fn record_fit(&self, outcome: &FitOutcome) {
        let Some(log) = &self.runlog else {
            return;
        };
        for record in outcome.history.epochs() {
            log.record_epoch_completed();
            for phase in [Phase::Train, Phase::Valid] {
                if let Some(score) = record.scores.iter().find(|s| s.phase == phase) {
                    log.record_trials_scored(score.n_trials as u64);
                }
            }
        }
        log.record_run_completed();
    }

    fn dataset_summary(&self, prepared: &Prepared) -> DatasetSummary {
        let sessions = prepared
            .dataset
            .counts_by(GroupKey::Session)
            .into_iter()
            .map(|(session, (windows, trials))| (session, GroupCount { windows, trials }))
            .collect();

        DatasetSummary {
            name: self.config.dataset.name.clone(),
            subject_ids: self.config.dataset.subject_ids.clone(),
            source: self.source_name(),
            n_recordings: prepared.n_recordings,
            n_windows: prepared.dataset.len(),
            n_trials: prepared.dataset.n_trials(),
            sessions,
        }
    }

    fn model_summary(&self, prepared: &Prepared) -> Result<ModelSummary> {
        let model = &self.config.model;
        let architecture = model.architecture()?;
        Ok(ModelSummary {
            kind: model.kind.name().to_string(),
            final_conv_length: model
                .final_conv_length
                .unwrap_or_else(|| model.kind.default_final_conv_length()),
            n_chans: model.n_chans,
            n_classes: model.n_classes,
            input_time_length: prepared.probe.input_time_length,
            receptive_field: architecture.receptive_field(),
            n_preds_per_input: prepared.probe.n_preds_per_input,
            n_parameters: prepared.model.parameters().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::runlog::RunLog;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.dataset.synthetic.runs_per_session = 1;
        config.dataset.synthetic.trials_per_run = 8;
        config
    }

    #[test]
    fn test_probe_default_model() {
        let pipeline = Pipeline::new(Config::default());
        let model = pipeline.build_model().unwrap();
        let probe = pipeline.probe(&model).unwrap();
        assert_eq!(probe.receptive_field, 534);
        assert_eq!(probe.n_preds_per_input, 467);
    }

    #[test]
    fn test_prepare_strides_by_probe() {
        let pipeline = Pipeline::new(small_config());
        let source = pipeline.source();
        let prepared = pipeline.prepare(source.as_ref()).unwrap();

        assert_eq!(prepared.windowing.window_stride_samples, 467);
        assert_eq!(prepared.n_recordings, 2);
        // 1125-sample span: one strided window plus one aligned to the end
        assert_eq!(prepared.dataset.len(), 2 * 16);
        assert_eq!(prepared.dataset.n_trials(), 16);
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let mut config = small_config();
        config.model.n_chans = 3;
        let pipeline = Pipeline::new(config);
        let source = pipeline.source();
        assert!(matches!(
            pipeline.prepare(source.as_ref()),
            Err(crate::Error::Model(ModelError::ChannelMismatch {
                expected: 3,
                found: 22
            }))
        ));
    }

    #[test]
    fn test_run_counts_into_runlog() {
        let runlog = Arc::new(RunLog::new());
        let pipeline = Pipeline::new(small_config()).with_runlog(runlog.clone());
        let report = pipeline.run(None).unwrap();

        assert_eq!(report.epochs.len(), 1);
        let stats = runlog.stats();
        assert_eq!(stats.recordings_loaded, 2);
        assert_eq!(stats.windows_created, 32);
        assert_eq!(stats.epochs_completed, 1);
        assert_eq!(stats.trials_scored, 16);
        assert_eq!(stats.runs_completed, 1);
    }
}

//! Cumulative run log.
//!
//! Counts what the pipeline has processed across runs and persists the
//! totals as JSON so `eeg-crop status` can report them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for everything a run touches.
#[derive(Debug)]
pub struct RunLog {
    recordings_loaded: AtomicU64,
    windows_created: AtomicU64,
    trials_scored: AtomicU64,
    epochs_completed: AtomicU64,
    reports_exported: AtomicU64,
    runs_completed: AtomicU64,
    /// Start of the current process
    session_start: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    persist_path: Option<PathBuf>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            recordings_loaded: AtomicU64::new(0),
            windows_created: AtomicU64::new(0),
            trials_scored: AtomicU64::new(0),
            epochs_completed: AtomicU64::new(0),
            reports_exported: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            session_start: Utc::now(),
            last_run: None,
            persist_path: None,
        }
    }

    /// Create a run log backed by a file, picking up earlier totals.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!(error = %e, "could not load previous run log");
        }

        log
    }

    pub fn record_recordings_loaded(&self, count: u64) {
        self.recordings_loaded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_windows_created(&self, count: u64) {
        self.windows_created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_trials_scored(&self, count: u64) {
        self.trials_scored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_epoch_completed(&self) {
        self.epochs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_exported(&self) {
        self.reports_exported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current totals.
    pub fn stats(&self) -> RunStats {
        RunStats {
            recordings_loaded: self.recordings_loaded.load(Ordering::Relaxed),
            windows_created: self.windows_created.load(Ordering::Relaxed),
            trials_scored: self.trials_scored.load(Ordering::Relaxed),
            epochs_completed: self.epochs_completed.load(Ordering::Relaxed),
            reports_exported: self.reports_exported.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            session_start: self.session_start,
            last_run: self.last_run,
        }
    }

    /// Summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let last_run = stats
            .last_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "Run Log:\n\
             - Runs completed: {}\n\
             - Recordings loaded: {}\n\
             - Windows created: {}\n\
             - Trials scored: {}\n\
             - Epochs completed: {}\n\
             - Reports exported: {}\n\
             - Last run: {}",
            stats.runs_completed,
            stats.recordings_loaded,
            stats.windows_created,
            stats.trials_scored,
            stats.epochs_completed,
            stats.reports_exported,
            last_run
        )
    }

    /// Save totals to disk, stamping the time as the last run.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedRunLog {
                recordings_loaded: stats.recordings_loaded,
                windows_created: stats.windows_created,
                trials_scored: stats.trials_scored,
                epochs_completed: stats.epochs_completed,
                reports_exported: stats.reports_exported,
                runs_completed: stats.runs_completed,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedRunLog =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.recordings_loaded
                    .store(persisted.recordings_loaded, Ordering::Relaxed);
                self.windows_created
                    .store(persisted.windows_created, Ordering::Relaxed);
                self.trials_scored
                    .store(persisted.trials_scored, Ordering::Relaxed);
                self.epochs_completed
                    .store(persisted.epochs_completed, Ordering::Relaxed);
                self.reports_exported
                    .store(persisted.reports_exported, Ordering::Relaxed);
                self.runs_completed
                    .store(persisted.runs_completed, Ordering::Relaxed);
                self.last_run = Some(persisted.last_updated);
            }
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.recordings_loaded.store(0, Ordering::Relaxed);
        self.windows_created.store(0, Ordering::Relaxed);
        self.trials_scored.store(0, Ordering::Relaxed);
        self.epochs_completed.store(0, Ordering::Relaxed);
        self.reports_exported.store(0, Ordering::Relaxed);
        self.runs_completed.store(0, Ordering::Relaxed);
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the run log totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub recordings_loaded: u64,
    pub windows_created: u64,
    pub trials_scored: u64,
    pub epochs_completed: u64,
    pub reports_exported: u64,
    pub runs_completed: u64,
    pub session_start: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRunLog {
    recordings_loaded: u64,
    windows_created: u64,
    trials_scored: u64,
    epochs_completed: u64,
    reports_exported: u64,
    #[serde(default)]
    runs_completed: u64,
    last_updated: DateTime<Utc>,
}

/// Run log shared between the pipeline and the CLI.
pub type SharedRunLog = Arc<RunLog>;

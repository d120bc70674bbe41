//! Recordings stored on disk as JSON.
//!
//! Layout: `<root>/<dataset>/sub-<id>/*.json`, one serialized [`Recording`]
//! per file. Files are loaded in file-name order.

use std::path::{Path, PathBuf};

use crate::dataset::source::{DatasetError, DatasetSource};
use crate::dataset::types::Recording;

/// Dataset source reading JSON recordings from a directory tree.
#[derive(Debug, Clone)]
pub struct JsonDirectorySource {
    root: PathBuf,
}

impl JsonDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the recordings of one subject.
    pub fn subject_dir(&self, dataset: &str, subject: u32) -> PathBuf {
        self.root.join(dataset).join(format!("sub-{subject}"))
    }

    /// Write a recording into the layout expected by [`DatasetSource::load`].
    pub fn store(&self, dataset: &str, recording: &Recording) -> Result<PathBuf, DatasetError> {
        let dir = self.subject_dir(dataset, recording.description.subject);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", recording.id));
        let json = serde_json::to_string(recording).map_err(|source| DatasetError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    fn read_recording(path: &Path) -> Result<Recording, DatasetError> {
        let content = std::fs::read_to_string(path)?;
        let recording: Recording =
            serde_json::from_str(&content).map_err(|source| DatasetError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        recording.validate()?;
        Ok(recording)
    }
}

impl DatasetSource for JsonDirectorySource {
    fn load(&self, dataset: &str, subject_ids: &[u32]) -> Result<Vec<Recording>, DatasetError> {
        if subject_ids.is_empty() {
            return Err(DatasetError::NoSubjects);
        }

        let mut recordings = Vec::new();
        for &subject in subject_ids {
            let dir = self.subject_dir(dataset, subject);
            let mut files: Vec<PathBuf> = match std::fs::read_dir(&dir) {
                Ok(entries) => entries
                    .map(|e| e.map(|e| e.path()))
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
                    .collect(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            files.sort();

            if files.is_empty() {
                return Err(DatasetError::NoRecordings {
                    subject,
                    path: dir.display().to_string(),
                });
            }

            for file in &files {
                let recording = Self::read_recording(file)?;
                tracing::debug!(
                    path = %file.display(),
                    id = %recording.id,
                    duration_secs = recording.duration_secs(),
                    "loaded recording"
                );
                recordings.push(recording);
            }
        }

        Ok(recordings)
    }
}

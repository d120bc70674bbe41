//! Dataset source abstraction and the registry of known datasets.

use thiserror::Error;

use crate::dataset::types::Recording;

/// Static description of a public dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetInfo {
    /// Dataset identifier
    pub name: &'static str,
    pub n_channels: usize,
    /// Sampling frequency in Hz
    pub sfreq: f64,
    /// Raw event codes, one per class
    pub event_codes: &'static [i32],
    pub sessions: &'static [&'static str],
    pub subjects: &'static [u32],
}

/// BCI Competition IV 2a: four-class motor imagery.
pub const BNCI2014001: DatasetInfo = DatasetInfo {
    name: "BNCI2014001",
    n_channels: 22,
    sfreq: 250.0,
    event_codes: &[1, 2, 3, 4],
    sessions: &["session_T", "session_E"],
    subjects: &[1, 2, 3, 4, 5, 6, 7, 8, 9],
};

/// BCI Competition IV 2b: two-class motor imagery, three bipolar channels.
pub const BNCI2014004: DatasetInfo = DatasetInfo {
    name: "BNCI2014004",
    n_channels: 3,
    sfreq: 250.0,
    event_codes: &[1, 2],
    sessions: &["session_0", "session_1", "session_2", "session_3", "session_4"],
    subjects: &[1, 2, 3, 4, 5, 6, 7, 8, 9],
};

const KNOWN_DATASETS: &[DatasetInfo] = &[BNCI2014001, BNCI2014004];

/// Look up a dataset by identifier.
pub fn dataset_info(name: &str) -> Result<DatasetInfo, DatasetError> {
    KNOWN_DATASETS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .copied()
        .ok_or_else(|| DatasetError::UnknownDataset(name.to_string()))
}

impl DatasetInfo {
    /// Check that every requested subject exists in this dataset.
    pub fn check_subjects(&self, subject_ids: &[u32]) -> Result<(), DatasetError> {
        if subject_ids.is_empty() {
            return Err(DatasetError::NoSubjects);
        }
        match subject_ids.iter().find(|s| !self.subjects.contains(s)) {
            Some(&subject) => Err(DatasetError::UnknownSubject {
                dataset: self.name.to_string(),
                subject,
            }),
            None => Ok(()),
        }
    }
}

/// Anything that can produce recordings for a dataset identifier and subjects.
///
/// Download and caching belong to the implementation.
pub trait DatasetSource {
    fn load(&self, dataset: &str, subject_ids: &[u32]) -> Result<Vec<Recording>, DatasetError>;
}

/// Errors that can occur while acquiring a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unknown dataset '{0}'")]
    UnknownDataset(String),

    #[error("dataset {dataset} has no subject {subject}")]
    UnknownSubject { dataset: String, subject: u32 },

    #[error("no subjects requested")]
    NoSubjects,

    #[error("recording '{recording}' is malformed: {reason}")]
    Malformed { recording: String, reason: String },

    #[error("no recordings found for subject {subject} under {path}")]
    NoRecordings { subject: u32, path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid source parameter: {0}")]
    InvalidParameter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_lookup() {
        let info = dataset_info("BNCI2014001").unwrap();
        assert_eq!(info.n_channels, 22);
        assert_eq!(info.event_codes.len(), 4);

        // identifiers are matched case-insensitively
        assert!(dataset_info("bnci2014001").is_ok());
        assert!(matches!(
            dataset_info("nope"),
            Err(DatasetError::UnknownDataset(_))
        ));
    }

    #[test]
    fn test_subject_check() {
        let info = dataset_info("BNCI2014001").unwrap();
        assert!(info.check_subjects(&[1, 9]).is_ok());
        assert!(matches!(
            info.check_subjects(&[10]),
            Err(DatasetError::UnknownSubject { subject: 10, .. })
        ));
        assert!(matches!(
            info.check_subjects(&[]),
            Err(DatasetError::NoSubjects)
        ));
    }
}

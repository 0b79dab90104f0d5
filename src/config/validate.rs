//! Preflight checks run before a job is spawned.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Configuration;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("No measurement directory selected")]
    MissingMeasurementDir,
    #[error("Measurement directory does not exist: {0}")]
    MeasurementDirNotFound(PathBuf),
    #[error("No test signal selected")]
    MissingTestSignal,
    #[error("Test signal not found: {0}")]
    TestSignalNotFound(PathBuf),
    #[error("Room measurement mic calibration not found: {0}")]
    MicCalibrationNotFound(PathBuf),
}

impl Configuration {
    pub fn check_measurement_dir(&self) -> Option<ValidationIssue> {
        if self.measurement_dir.trim().is_empty() {
            return Some(ValidationIssue::MissingMeasurementDir);
        }
        let dir = self.measurement_path();
        (!dir.is_dir()).then_some(ValidationIssue::MeasurementDirNotFound(dir))
    }

    /// Relative test signal paths are tried as given and then under the
    /// measurement directory.
    pub fn check_test_signal(&self) -> Option<ValidationIssue> {
        let signal = self.test_signal.trim();
        if signal.is_empty() {
            return Some(ValidationIssue::MissingTestSignal);
        }
        let path = Path::new(signal);
        if path.is_file() || (path.is_relative() && self.measurement_path().join(path).is_file()) {
            return None;
        }
        Some(ValidationIssue::TestSignalNotFound(path.to_path_buf()))
    }

    /// Only checked when room correction is on and a calibration file is set.
    pub fn check_mic_calibration(&self) -> Option<ValidationIssue> {
        let room = &self.room_correction;
        let file = room.mic_calibration.trim();
        if !room.enabled || file.is_empty() {
            return None;
        }
        let path = PathBuf::from(file);
        (!path.is_file()).then_some(ValidationIssue::MicCalibrationNotFound(path))
    }
}

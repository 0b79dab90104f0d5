//! Turns a configuration into a runnable [`JobSpec`] for each job kind.

use crate::config::args::{self, HEADPHONES_CAPTURE_FILE, ROOM_CAPTURE_FILE};
use crate::config::{Configuration, ValidationIssue};
use crate::services::Toolchain;

use super::error::JobError;
use super::types::{JobKind, JobSpec};

/// Build the command for `kind`. Never fails; see [`prepare`] for the checked
/// variant.
pub fn job_spec(kind: JobKind, config: &Configuration, toolchain: &Toolchain) -> JobSpec {
    let settings = toolchain.settings();
    let (script, arguments) = match kind {
        JobKind::Processing => (&settings.processing_script, args::build(config)),
        JobKind::Measurement => (&settings.recorder_script, args::build_recorder(config, None)),
        JobKind::HeadphoneRecording => (
            &settings.recorder_script,
            args::build_recorder(config, Some(HEADPHONES_CAPTURE_FILE)),
        ),
        JobKind::RoomRecording => (
            &settings.recorder_script,
            args::build_recorder(config, Some(ROOM_CAPTURE_FILE)),
        ),
        JobKind::CaptureWizard => (&settings.capture_wizard_script, args::build_wizard(config)),
        JobKind::LayoutWizard => (&settings.layout_wizard_script, args::build_wizard(config)),
    };
    JobSpec::new(kind, toolchain.script_command(script, arguments))
}

/// Everything that would make `kind` fail before it got going.
pub fn preflight(kind: JobKind, config: &Configuration) -> Vec<ValidationIssue> {
    let mut checks = vec![config.check_measurement_dir()];
    match kind {
        JobKind::Processing => checks.push(config.check_mic_calibration()),
        JobKind::Measurement | JobKind::HeadphoneRecording | JobKind::RoomRecording => {
            checks.push(config.check_test_signal())
        }
        JobKind::CaptureWizard | JobKind::LayoutWizard => {}
    }
    checks.into_iter().flatten().collect()
}

/// [`preflight`] then [`job_spec`].
pub fn prepare(
    kind: JobKind,
    config: &Configuration,
    toolchain: &Toolchain,
) -> Result<JobSpec, JobError> {
    let issues = preflight(kind, config);
    if !issues.is_empty() {
        for issue in &issues {
            log::warn!("{} preflight: {}", kind, issue);
        }
        return Err(JobError::Preflight(issues));
    }
    Ok(job_spec(kind, config, toolchain))
}

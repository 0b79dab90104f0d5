use crate::config::ValidationIssue;

use super::types::{JobId, JobKind};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A launch while another job is still running. The running job is untouched.
    #[error("{running_kind} job {running} is still running")]
    AlreadyRunning { running: JobId, running_kind: JobKind },
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot start job: {}", join_issues(.0))]
    Preflight(Vec<ValidationIssue>),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

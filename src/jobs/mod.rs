//! Supervised external jobs: one long-running toolchain invocation at a time,
//! with its output split into log text and progress updates.

pub mod error;
pub mod launcher;
pub mod stream;
pub mod supervisor;
pub mod types;

pub use error::JobError;
pub use launcher::{job_spec, preflight, prepare};
pub use stream::{parse_progress, OutputClassifier, OutputLine, StreamSource, PROGRESS_MARKER};
pub use supervisor::{JobHandle, ProcessSupervisor};
pub use types::{
    JobEvent, JobId, JobKind, JobReport, JobSnapshot, JobSpec, JobState, ProgressSignal,
    SupervisorStatus,
};

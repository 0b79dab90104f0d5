use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::CommandSpec;

pub type JobId = Uuid;

/// What a job runs. All kinds share the supervisor's single slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// BRIR generation / compensation with the main processing tool.
    Processing,
    /// Speaker capture with the recorder.
    Measurement,
    HeadphoneRecording,
    RoomRecording,
    CaptureWizard,
    LayoutWizard,
}

impl JobKind {
    pub fn label(self) -> &'static str {
        match self {
            JobKind::Processing => "processing",
            JobKind::Measurement => "measurement",
            JobKind::HeadphoneRecording => "headphone recording",
            JobKind::RoomRecording => "room recording",
            JobKind::CaptureWizard => "capture wizard",
            JobKind::LayoutWizard => "layout wizard",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A job ready to be handed to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub kind: JobKind,
    pub command: CommandSpec,
}

impl JobSpec {
    pub fn new(kind: JobKind, command: CommandSpec) -> Self {
        Self { kind, command }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Exited with status 0.
    Completed,
    Failed {
        exit_code: Option<i32>,
        reason: String,
    },
    /// A cancel was accepted before the process exited, whatever the exit
    /// status.
    Cancelled,
}

/// `PROGRESS <fraction> [<remaining seconds>]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSignal {
    pub fraction: f64,
    pub remaining_seconds: Option<f64>,
}

/// Final record of a job, kept by the supervisor until the next launch ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub kind: JobKind,
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub state: JobState,
    pub progress: Option<ProgressSignal>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Completed
    }
}

/// Read-only view of the running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Local>,
    pub progress: Option<ProgressSignal>,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SupervisorStatus {
    Idle,
    Running(JobSnapshot),
}

impl SupervisorStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SupervisorStatus::Running(_))
    }
}

/// Broadcast to observers in the order things happened to the job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started { id: JobId, kind: JobKind },
    /// One log line; `terminated` is false only for a trailing partial line
    /// flushed at exit.
    Log { id: JobId, text: String, terminated: bool },
    Progress { id: JobId, progress: ProgressSignal },
    Finished(JobReport),
}

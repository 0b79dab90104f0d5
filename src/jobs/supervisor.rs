//! Lifecycle of the single active job.
//!
//! `Idle -> Running -> {Completed, Failed, Cancelled} -> Idle`. The running
//! job is owned by the supervisor; callers only see snapshots, the
//! accumulated log and broadcast [`JobEvent`]s. Output is read by one task per
//! pipe and handed over a channel to a classifier task, so lines are published
//! in the order they arrived.

use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::error::JobError;
use super::stream::{OutputClassifier, OutputLine, StreamSource};
use super::types::{
    JobEvent, JobId, JobKind, JobReport, JobSnapshot, JobSpec, JobState, SupervisorStatus,
};

const READ_BUFFER_SIZE: usize = 4096;
const CHUNK_QUEUE_DEPTH: usize = 64;
const EVENT_QUEUE_DEPTH: usize = 256;
/// How long output may keep trickling in after the process has exited
/// (e.g. from grandchildren still holding the pipes).
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

struct ActiveJob {
    snapshot: JobSnapshot,
    cancel: Option<oneshot::Sender<()>>,
    /// The process is gone and only its output is still draining.
    exited: bool,
}

#[derive(Default)]
struct Shared {
    active: Option<ActiveJob>,
    /// Log of the current (or most recent) job.
    log: String,
    last: Option<JobReport>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Completion handle returned by [`ProcessSupervisor::launch`].
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    pub kind: JobKind,
    done: oneshot::Receiver<JobReport>,
}

impl JobHandle {
    /// Wait for the job to reach a terminal state and the supervisor to be
    /// idle again. `None` if the runtime dropped the supervising task.
    pub async fn wait(self) -> Option<JobReport> {
        self.done.await.ok()
    }
}

pub struct ProcessSupervisor {
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<JobEvent>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_QUEUE_DEPTH);
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            events,
        }
    }

    /// Spawn `spec` as the running job. Must be called from within a Tokio
    /// runtime.
    ///
    /// Rejected with [`JobError::AlreadyRunning`] while another job runs. A
    /// process that cannot be started is recorded as a `Failed` job with one
    /// log line and the supervisor stays idle.
    pub fn launch(&self, spec: JobSpec) -> Result<JobHandle, JobError> {
        let mut shared = lock(&self.shared);
        if let Some(active) = &shared.active {
            log::warn!(
                "Rejected {} launch: {} job {} is still running",
                spec.kind,
                active.snapshot.kind,
                active.snapshot.id
            );
            return Err(JobError::AlreadyRunning {
                running: active.snapshot.id,
                running_kind: active.snapshot.kind,
            });
        }

        let id = Uuid::new_v4();
        let kind = spec.kind;
        let command_line = spec.command.to_string();
        let working_dir = spec.command.working_dir.clone();
        let started_at = Local::now();
        shared.log.clear();

        log::info!("Launching {} job {}: {}", kind, id, command_line);
        let mut child = match spec.command.to_tokio_command().spawn() {
            Ok(child) => child,
            Err(source) => {
                let program = spec.command.program.display().to_string();
                let reason = format!("Failed to start {}: {}", program, source);
                log::error!("{}", reason);
                shared.log.push_str(&reason);
                shared.log.push('\n');
                let report = JobReport {
                    id,
                    kind,
                    command: command_line,
                    working_dir,
                    started_at,
                    finished_at: Local::now(),
                    state: JobState::Failed {
                        exit_code: None,
                        reason: reason.clone(),
                    },
                    progress: None,
                };
                shared.last = Some(report.clone());
                drop(shared);

                let _ = self.events.send(JobEvent::Log {
                    id,
                    text: reason,
                    terminated: true,
                });
                let _ = self.events.send(JobEvent::Finished(report));
                return Err(JobError::Spawn { program, source });
            }
        };

        let pid = child.id();
        log::debug!("{} job {} running as pid {:?}", kind, id, pid);

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_chunks(
                stdout,
                StreamSource::Stdout,
                chunk_tx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_chunks(
                stderr,
                StreamSource::Stderr,
                chunk_tx.clone(),
            )));
        }
        drop(chunk_tx);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        shared.active = Some(ActiveJob {
            snapshot: JobSnapshot {
                id,
                kind,
                command: command_line,
                working_dir,
                pid,
                started_at,
                progress: None,
                cancel_requested: false,
            },
            cancel: Some(cancel_tx),
            exited: false,
        });
        drop(shared);

        let _ = self.events.send(JobEvent::Started { id, kind });

        let classifier = tokio::spawn(classify_output(
            id,
            chunk_rx,
            self.shared.clone(),
            self.events.clone(),
        ));
        tokio::spawn(supervise(Supervised {
            id,
            child,
            cancel_rx,
            readers,
            classifier,
            done_tx,
            shared: self.shared.clone(),
            events: self.events.clone(),
        }));

        Ok(JobHandle {
            id,
            kind,
            done: done_rx,
        })
    }

    /// Ask the running job to terminate. Returns `false` when nothing is
    /// running or the process has already exited and only its output is
    /// draining. The job stays `Running` until its exit has been observed.
    pub fn cancel(&self) -> bool {
        let mut shared = lock(&self.shared);
        let Some(active) = shared.active.as_mut() else {
            log::debug!("Cancel requested with no running job");
            return false;
        };
        if active.exited {
            log::debug!("Cancel requested after job {} exited", active.snapshot.id);
            return false;
        }
        if let Some(cancel) = active.cancel.take() {
            log::info!(
                "Cancelling {} job {}",
                active.snapshot.kind,
                active.snapshot.id
            );
            active.snapshot.cancel_requested = true;
            let _ = cancel.send(());
        }
        true
    }

    pub fn status(&self) -> SupervisorStatus {
        match &lock(&self.shared).active {
            Some(active) => SupervisorStatus::Running(active.snapshot.clone()),
            None => SupervisorStatus::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared).active.is_some()
    }

    /// Log text of the current or most recent job.
    pub fn log(&self) -> String {
        lock(&self.shared).log.clone()
    }

    pub fn clear_log(&self) {
        lock(&self.shared).log.clear();
    }

    pub fn last_report(&self) -> Option<JobReport> {
        lock(&self.shared).last.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn read_chunks<R>(mut pipe: R, source: StreamSource, tx: mpsc::Sender<(StreamSource, Vec<u8>)>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send((source, buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("Read error on job {:?}: {}", source, e);
                break;
            }
        }
    }
}

async fn classify_output(
    id: JobId,
    mut chunks: mpsc::Receiver<(StreamSource, Vec<u8>)>,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<JobEvent>,
) {
    let mut classifier = OutputClassifier::new();
    while let Some((source, chunk)) = chunks.recv().await {
        let lines = classifier.feed(source, &chunk);
        publish(id, lines, &shared, &events);
    }
    let tail = classifier.finish();
    publish(id, tail, &shared, &events);
}

fn publish(
    id: JobId,
    lines: Vec<OutputLine>,
    shared: &Mutex<Shared>,
    events: &broadcast::Sender<JobEvent>,
) {
    if lines.is_empty() {
        return;
    }
    let mut guard = lock(shared);
    for line in lines {
        match line {
            OutputLine::Progress(progress) => {
                if let Some(active) = guard.active.as_mut().filter(|a| a.snapshot.id == id) {
                    active.snapshot.progress = Some(progress);
                }
                let _ = events.send(JobEvent::Progress { id, progress });
            }
            OutputLine::Log(line) => {
                line.append_to(&mut guard.log);
                let _ = events.send(JobEvent::Log {
                    id,
                    text: line.text,
                    terminated: line.terminated,
                });
            }
        }
    }
}

struct Supervised {
    id: JobId,
    child: Child,
    cancel_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    classifier: JoinHandle<()>,
    done_tx: oneshot::Sender<JobReport>,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<JobEvent>,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    CancelRequested,
}

async fn supervise(job: Supervised) {
    let Supervised {
        id,
        mut child,
        mut cancel_rx,
        readers,
        mut classifier,
        done_tx,
        shared,
        events,
    } = job;

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        Ok(()) = &mut cancel_rx => Outcome::CancelRequested,
    };

    let (status, cancelled) = match outcome {
        Outcome::Exited(status) => (status, mark_exited(&shared)),
        Outcome::CancelRequested => {
            if let Err(e) = child.start_kill() {
                log::warn!("Failed to signal job {}: {}", id, e);
            }
            for reader in &readers {
                reader.abort();
            }
            log::debug!("Job {} readers detached after cancel", id);
            let status = child.wait().await;
            mark_exited(&shared);
            (status, true)
        }
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, &mut classifier).await.is_err() {
        log::warn!("Job {} output still open after exit, detaching readers", id);
        for reader in &readers {
            reader.abort();
        }
        let _ = classifier.await;
    }

    let mut guard = lock(&shared);
    let Some(active) = guard.active.take() else {
        log::error!("Job {} finished but was no longer active", id);
        return;
    };
    let snapshot = active.snapshot;
    let state = if cancelled {
        JobState::Cancelled
    } else {
        match status {
            Ok(status) if status.success() => JobState::Completed,
            Ok(status) => JobState::Failed {
                exit_code: status.code(),
                reason: format!("Process exited with {}", status),
            },
            Err(e) => JobState::Failed {
                exit_code: None,
                reason: format!("Failed to wait for process: {}", e),
            },
        }
    };
    let report = JobReport {
        id,
        kind: snapshot.kind,
        command: snapshot.command,
        working_dir: snapshot.working_dir,
        started_at: snapshot.started_at,
        finished_at: Local::now(),
        state,
        progress: snapshot.progress,
    };
    guard.last = Some(report.clone());
    drop(guard);

    log::info!("{} job {} finished: {:?}", report.kind, id, report.state);
    let _ = events.send(JobEvent::Finished(report.clone()));
    let _ = done_tx.send(report);
}

/// Close the cancel window once the exit status is known. Returns whether a
/// cancel was accepted before that point.
fn mark_exited(shared: &Mutex<Shared>) -> bool {
    let mut guard = lock(shared);
    match guard.active.as_mut() {
        Some(active) => {
            active.exited = true;
            active.cancel = None;
            active.snapshot.cancel_requested
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::ProgressSignal;
    use crate::services::CommandSpec;

    const WAIT: Duration = Duration::from_secs(10);

    fn sh(kind: JobKind, script: &str) -> JobSpec {
        JobSpec::new(kind, CommandSpec::new("sh").arg("-c").arg(script))
    }

    async fn finish(handle: JobHandle) -> JobReport {
        tokio::time::timeout(WAIT, handle.wait())
            .await
            .expect("job did not finish in time")
            .expect("supervisor dropped the job")
    }

    #[tokio::test]
    async fn completed_job_collects_log_and_progress() {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor
            .launch(sh(
                JobKind::Processing,
                "printf 'start\\nPROGRESS 0.5 10\\nmiddle\\n'; printf 'PROGRESS 1\\nend'",
            ))
            .unwrap();

        let report = finish(handle).await;
        assert_eq!(report.state, JobState::Completed);
        assert!(report.succeeded());
        assert_eq!(
            report.progress,
            Some(ProgressSignal {
                fraction: 1.0,
                remaining_seconds: None,
            })
        );
        assert_eq!(supervisor.log(), "start\nmiddle\nend");
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.status(), SupervisorStatus::Idle);
        assert_eq!(supervisor.last_report(), Some(report));
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed() {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor
            .launch(sh(JobKind::Measurement, "echo 'no device' >&2; exit 3"))
            .unwrap();

        let report = finish(handle).await;
        match report.state {
            JobState::Failed { exit_code, .. } => assert_eq!(exit_code, Some(3)),
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(supervisor.log(), "no device\n");
    }

    #[tokio::test]
    async fn second_launch_is_rejected_while_running() {
        let supervisor = ProcessSupervisor::new();
        let first = supervisor
            .launch(sh(JobKind::Processing, "exec sleep 30"))
            .unwrap();
        let first_id = first.id;

        let err = supervisor
            .launch(sh(JobKind::RoomRecording, "echo never"))
            .unwrap_err();
        match err {
            JobError::AlreadyRunning {
                running,
                running_kind,
            } => {
                assert_eq!(running, first_id);
                assert_eq!(running_kind, JobKind::Processing);
            }
            other => panic!("unexpected error {:?}", other),
        }
        match supervisor.status() {
            SupervisorStatus::Running(snapshot) => {
                assert_eq!(snapshot.id, first_id);
                assert!(!snapshot.cancel_requested);
            }
            SupervisorStatus::Idle => panic!("first job should still be running"),
        }

        assert!(supervisor.cancel());
        let report = finish(first).await;
        assert_eq!(report.state, JobState::Cancelled);
        assert!(!supervisor.is_running());

        let next = supervisor
            .launch(sh(JobKind::RoomRecording, "echo again"))
            .unwrap();
        assert_eq!(finish(next).await.state, JobState::Completed);
        assert_eq!(supervisor.log(), "again\n");
    }

    #[tokio::test]
    async fn cancel_while_output_drains_is_refused() {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor
            .launch(sh(JobKind::Processing, "echo done; (sleep 2) & exit 0"))
            .unwrap();

        for _ in 0..100 {
            if supervisor.log() == "done\n" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!supervisor.cancel());

        let report = finish(handle).await;
        assert_eq!(report.state, JobState::Completed);
        assert_eq!(supervisor.log(), "done\n");
    }

    #[tokio::test]
    async fn cancel_when_idle_is_a_no_op() {
        let supervisor = ProcessSupervisor::new();
        assert!(!supervisor.cancel());
        assert_eq!(supervisor.status(), SupervisorStatus::Idle);
        assert_eq!(supervisor.last_report(), None);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_supervisor_idle() {
        let supervisor = ProcessSupervisor::new();
        let spec = JobSpec::new(
            JobKind::CaptureWizard,
            CommandSpec::new("/nonexistent/earprint-python").arg("capture_wizard.py"),
        );

        let err = supervisor.launch(spec).unwrap_err();
        assert!(matches!(err, JobError::Spawn { .. }));
        assert!(!supervisor.is_running());

        let report = supervisor.last_report().unwrap();
        assert_eq!(report.kind, JobKind::CaptureWizard);
        assert!(matches!(
            report.state,
            JobState::Failed {
                exit_code: None,
                ..
            }
        ));
        let log = supervisor.log();
        assert!(log.starts_with("Failed to start /nonexistent/earprint-python"), "{}", log);
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let supervisor = ProcessSupervisor::new();
        let mut events = supervisor.subscribe();
        let handle = supervisor
            .launch(sh(JobKind::LayoutWizard, "echo one; echo 'PROGRESS 0.3'; echo two"))
            .unwrap();
        let id = handle.id;
        finish(handle).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen.first(),
            Some(&JobEvent::Started {
                id,
                kind: JobKind::LayoutWizard,
            })
        );
        assert!(matches!(seen.last(), Some(JobEvent::Finished(report)) if report.id == id));

        let middle: Vec<_> = seen[1..seen.len() - 1].to_vec();
        assert_eq!(
            middle,
            vec![
                JobEvent::Log {
                    id,
                    text: "one".to_string(),
                    terminated: true,
                },
                JobEvent::Progress {
                    id,
                    progress: ProgressSignal {
                        fraction: 0.3,
                        remaining_seconds: None,
                    },
                },
                JobEvent::Log {
                    id,
                    text: "two".to_string(),
                    terminated: true,
                },
            ]
        );
    }
}

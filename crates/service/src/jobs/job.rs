use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Finished,
    Terminated,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Terminated => "terminated",
            JobState::Error => "error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last reported training progress. Always written as a pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub iteration: u64,
    pub loss: f64,
}

/// Point-in-time copy of a job, safe to hand out to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: u64,
    pub state: JobState,
    pub progress: Option<Progress>,
    pub error: Option<String>,
    /// Run time so far, frozen once the job is terminal.
    pub elapsed: Duration,
    pub created_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn loss(&self) -> Option<f64> {
        self.progress.map(|p| p.loss)
    }

    pub fn iteration(&self) -> Option<u64> {
        self.progress.map(|p| p.iteration)
    }
}

#[derive(Debug, Clone)]
struct JobCell {
    state: JobState,
    progress: Option<Progress>,
    error: Option<String>,
    finished_after: Option<Duration>,
}

/// A single training job.
///
/// All mutable state lives in one `watch` channel: mutations are
/// check-and-set closures run under the channel lock, and long-poll waiters
/// subscribe before inspecting the state, so a change between the check and
/// the wait is never missed.
#[derive(Debug)]
pub struct Job {
    id: u64,
    created_at: DateTime<Utc>,
    started: Instant,
    cancel: CancellationToken,
    cell: watch::Sender<JobCell>,
}

impl Job {
    pub(crate) fn new(id: u64) -> Self {
        let (cell, _) = watch::channel(JobCell {
            state: JobState::Running,
            progress: None,
            error: None,
            finished_after: None,
        });
        Self { id, created_at: Utc::now(), started: Instant::now(), cancel: CancellationToken::new(), cell }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.cell.borrow().state
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let cell = self.cell.borrow();
        JobSnapshot {
            id: self.id,
            state: cell.state,
            progress: cell.progress,
            error: cell.error.clone(),
            elapsed: cell.finished_after.unwrap_or_else(|| self.started.elapsed()),
            created_at: self.created_at,
        }
    }

    /// Record a new (iteration, loss) pair. Ignored once terminal, for
    /// iteration regressions, and for losses that are negative or not finite.
    pub fn update_progress(&self, iteration: u64, loss: f64) -> bool {
        if !loss.is_finite() || loss < 0.0 {
            return false;
        }
        self.cell.send_if_modified(|cell| {
            if cell.state.is_terminal() {
                return false;
            }
            if matches!(cell.progress, Some(p) if p.iteration > iteration) {
                return false;
            }
            cell.progress = Some(Progress { iteration, loss });
            true
        })
    }

    /// Move to a terminal state. Terminal states are absorbing, so this is a
    /// no-op (returning `false`) when the job already left `running`.
    pub fn transition(&self, to: JobState, error: Option<String>) -> bool {
        if !to.is_terminal() {
            return false;
        }
        let elapsed = self.started.elapsed();
        self.cell.send_if_modified(|cell| {
            if cell.state.is_terminal() {
                return false;
            }
            cell.state = to;
            cell.error = error;
            cell.finished_after = Some(elapsed);
            true
        })
    }

    /// Record the final metric and finish in one step.
    pub fn complete(&self, iterations: u64, loss: f64) -> bool {
        let elapsed = self.started.elapsed();
        self.cell.send_if_modified(|cell| {
            if cell.state.is_terminal() {
                return false;
            }
            if loss.is_finite() && loss >= 0.0 {
                let iteration = cell.progress.map_or(iterations, |p| p.iteration.max(iterations));
                cell.progress = Some(Progress { iteration, loss });
            }
            cell.state = JobState::Finished;
            cell.finished_after = Some(elapsed);
            true
        })
    }

    /// Signal the backend to stop and mark the job terminated without waiting
    /// for the worker. Returns whether this call performed the transition.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel();
        self.transition(JobState::Terminated, None)
    }

    /// Wait until the state or progress changes, or `max_wait` elapses.
    /// Returns the latest snapshot and the time actually spent waiting.
    pub async fn wait_for_change(&self, max_wait: Duration) -> (JobSnapshot, Duration) {
        let started = Instant::now();
        let mut rx = self.cell.subscribe();
        let terminal = rx.borrow_and_update().state.is_terminal();
        if !terminal && !max_wait.is_zero() {
            let _ = tokio::time::timeout(max_wait, rx.changed()).await;
        }
        (self.snapshot(), started.elapsed())
    }
}

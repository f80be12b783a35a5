use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use super::job::{Job, JobSnapshot, JobState};
use crate::errors::ServiceError;

/// Result of a long-poll status query.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub job: JobSnapshot,
    /// Time actually spent waiting, not the requested budget.
    pub waited: Duration,
}

/// Jobs of one service, keyed by a per-service id starting at 1.
#[derive(Debug)]
pub struct JobTable {
    next_id: AtomicU64,
    jobs: DashMap<u64, Arc<Job>>,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), jobs: DashMap::new() }
    }

    /// Create a running job under the next id.
    pub fn allocate(&self) -> Arc<Job> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = Arc::new(Job::new(id));
        self.jobs.insert(id, Arc::clone(&job));
        debug!(job = id, "job allocated");
        job
    }

    /// Look up a job. The returned handle outlives the map guard.
    pub fn get(&self, id: u64) -> Result<Arc<Job>, ServiceError> {
        self.jobs
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ServiceError::job_not_found(id))
    }

    pub fn update_progress(&self, id: u64, iteration: u64, loss: f64) -> Result<bool, ServiceError> {
        Ok(self.get(id)?.update_progress(iteration, loss))
    }

    pub fn transition(&self, id: u64, to: JobState, error: Option<String>) -> Result<bool, ServiceError> {
        Ok(self.get(id)?.transition(to, error))
    }

    /// Long-poll: wait up to `max_wait` for the job to change, then report it.
    pub async fn snapshot(&self, id: u64, max_wait: Duration) -> Result<StatusReport, ServiceError> {
        let job = self.get(id)?;
        let (snapshot, waited) = job.wait_for_change(max_wait).await;
        Ok(StatusReport { job: snapshot, waited })
    }

    pub fn remove(&self, id: u64) -> Result<Arc<Job>, ServiceError> {
        self.jobs
            .remove(&id)
            .map(|(_, job)| job)
            .ok_or_else(|| ServiceError::job_not_found(id))
    }

    /// Snapshots of all jobs, ordered by id.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut out: Vec<JobSnapshot> = self.jobs.iter().map(|entry| entry.value().snapshot()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    /// Terminate every running job; returns how many were stopped.
    pub fn cancel_all(&self) -> usize {
        let jobs: Vec<Arc<Job>> = self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect();
        jobs.iter().filter(|job| job.cancel()).count()
    }

    pub fn running(&self) -> usize {
        self.jobs.iter().filter(|entry| entry.value().state() == JobState::Running).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

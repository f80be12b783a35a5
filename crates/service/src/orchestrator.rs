use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{BackendError, TrainContext, TrainOutcome, TrainParams};
use crate::errors::ServiceError;
use crate::jobs::{Job, JobSnapshot, JobState, StatusReport};
use crate::metrics;
use crate::registry::{Service, ServiceRegistry};

#[derive(Debug, Clone)]
pub struct OrchestratorLimits {
    /// Long-poll budgets above this are clamped.
    pub max_status_wait: Duration,
    pub default_iterations: u64,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self::from(&configs::OrchestratorConfig::default())
    }
}

impl From<&configs::OrchestratorConfig> for OrchestratorLimits {
    fn from(cfg: &configs::OrchestratorConfig) -> Self {
        Self { max_status_wait: cfg.max_status_wait(), default_iterations: cfg.default_iterations }
    }
}

/// Result of a train submission.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainResponse {
    /// Synchronous run finished; the job record has already been released.
    Completed { job: u64, outcome: TrainOutcome, elapsed: Duration },
    /// Asynchronous run started on a background worker.
    Started { job: u64, elapsed: Duration },
}

/// Drives training jobs against the services of a registry.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    limits: OrchestratorLimits,
}

impl Orchestrator {
    pub fn new(registry: Arc<ServiceRegistry>, limits: OrchestratorLimits) -> Self {
        Self { registry, limits }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> &OrchestratorLimits {
        &self.limits
    }

    /// Submit a training run. Sync runs block the caller until the backend
    /// returns; async runs get their own worker task and return at once.
    #[instrument(skip(self, params), fields(iterations = params.iterations))]
    pub async fn train(&self, service: &str, params: TrainParams, run_async: bool) -> Result<TrainResponse, ServiceError> {
        let started = Instant::now();
        let service = self.registry.lookup(service).await?;
        let job = service.jobs().allocate();
        let id = job.id();

        if run_async {
            metrics::JOBS_SUBMITTED_TOTAL.with_label_values(&["async"]).inc();
            spawn_worker(Arc::clone(&service), job, params);
            info!(service = %service.name(), job = id, "async training started");
            return Ok(TrainResponse::Started { job: id, elapsed: started.elapsed() });
        }

        metrics::JOBS_SUBMITTED_TOTAL.with_label_values(&["sync"]).inc();
        let mut guard = SyncRun::new(Arc::clone(&service), Arc::clone(&job));
        let joined = tokio::spawn(run_job(Arc::clone(&service), Arc::clone(&job), params)).await;
        guard.disarm();
        drop(guard);

        match joined {
            // A cancel can land between the backend returning and `complete`.
            Ok(Ok(_)) if job.state() != JobState::Finished => {
                Err(ServiceError::Backend(format!("job {} was terminated before completion", id)))
            }
            Ok(Ok(outcome)) => Ok(TrainResponse::Completed { job: id, outcome, elapsed: started.elapsed() }),
            Ok(Err(BackendError::Cancelled)) => {
                Err(ServiceError::Backend(format!("job {} was terminated before completion", id)))
            }
            Ok(Err(BackendError::Failed(msg))) => Err(ServiceError::Backend(msg)),
            Err(e) => {
                record_worker_failure(&job, &e);
                Err(ServiceError::Internal(format!("training worker failed: {}", e)))
            }
        }
    }

    /// Long-poll the state of a job for at most `max_wait` (clamped).
    pub async fn status(&self, service: &str, job: u64, max_wait: Duration) -> Result<StatusReport, ServiceError> {
        let service = self.registry.lookup(service).await?;
        let budget = max_wait.min(self.limits.max_status_wait);
        let report = service.jobs().snapshot(job, budget).await?;
        metrics::STATUS_WAIT_SECONDS.observe(report.waited.as_secs_f64());
        debug!(
            service = %service.name(),
            job,
            state = %report.job.state,
            waited_ms = report.waited.as_millis() as u64,
            "status served"
        );
        Ok(report)
    }

    /// Request cancellation and mark the job terminated without waiting for
    /// the worker. A job that is already terminal is left untouched.
    #[instrument(skip(self))]
    pub async fn cancel(&self, service: &str, job: u64) -> Result<JobSnapshot, ServiceError> {
        let service = self.registry.lookup(service).await?;
        let handle = service.jobs().get(job)?;
        if handle.cancel() {
            metrics::JOBS_TERMINATED_TOTAL.inc();
            info!(service = %service.name(), job, "job terminated");
        } else {
            debug!(service = %service.name(), job, state = %handle.state(), "cancel on terminal job ignored");
        }
        Ok(handle.snapshot())
    }

    /// Cancel if still running, then release the job record.
    #[instrument(skip(self))]
    pub async fn acknowledge(&self, service: &str, job: u64) -> Result<JobSnapshot, ServiceError> {
        let snapshot = self.cancel(service, job).await?;
        let service = self.registry.lookup(service).await?;
        service.jobs().remove(job)?;
        info!(service = %service.name(), job, state = %snapshot.state, "job cleared");
        Ok(snapshot)
    }
}

/// Releases a sync job's record when the caller is done with it. While armed,
/// dropping it (the caller went away mid-run) also terminates the job.
struct SyncRun {
    service: Arc<Service>,
    job: Arc<Job>,
    armed: bool,
}

impl SyncRun {
    fn new(service: Arc<Service>, job: Arc<Job>) -> Self {
        Self { service, job, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SyncRun {
    fn drop(&mut self) {
        if self.armed && self.job.cancel() {
            metrics::JOBS_TERMINATED_TOTAL.inc();
            debug!(service = %self.service.name(), job = self.job.id(), "sync caller dropped, job terminated");
        }
        let _ = self.service.jobs().remove(self.job.id());
    }
}

fn spawn_worker(service: Arc<Service>, job: Arc<Job>, params: TrainParams) {
    tokio::spawn(async move {
        let worker = tokio::spawn(run_job(service, Arc::clone(&job), params));
        if let Err(e) = worker.await {
            record_worker_failure(&job, &e);
        }
    });
}

/// Run the backend for one job and record its terminal state.
async fn run_job(service: Arc<Service>, job: Arc<Job>, params: TrainParams) -> Result<TrainOutcome, BackendError> {
    let ctx = TrainContext::new(Arc::clone(&job));
    let started = Instant::now();
    let result = service.backend().train(&params, &ctx).await;
    let id = job.id();

    match &result {
        Ok(outcome) => {
            if job.complete(outcome.iterations, outcome.loss) {
                metrics::JOBS_FINISHED_TOTAL.inc();
                metrics::TRAIN_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
                info!(service = %service.name(), job = id, iterations = outcome.iterations, loss = outcome.loss, "training finished");
            } else {
                debug!(service = %service.name(), job = id, "late completion after termination ignored");
            }
        }
        Err(BackendError::Cancelled) => {
            if job.transition(JobState::Terminated, None) {
                metrics::JOBS_TERMINATED_TOTAL.inc();
            }
            debug!(service = %service.name(), job = id, "backend stopped after cancellation");
        }
        Err(BackendError::Failed(msg)) => {
            if job.is_cancelled() {
                job.transition(JobState::Terminated, None);
                debug!(service = %service.name(), job = id, error = %msg, "backend failed while terminating");
            } else if job.transition(JobState::Error, Some(msg.clone())) {
                metrics::JOBS_FAILED_TOTAL.inc();
                warn!(service = %service.name(), job = id, error = %msg, "training failed");
            }
        }
    }
    result
}

fn record_worker_failure(job: &Job, e: &JoinError) {
    if job.transition(JobState::Error, Some(format!("training worker failed: {}", e))) {
        metrics::JOBS_FAILED_TOTAL.inc();
    }
    error!(job = job.id(), error = %e, "training worker aborted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockBehavior, MockFactory};
    use crate::backend::{BackendFactory, BackendKind, SimulatedFactory};
    use crate::registry::{InputKind, ServiceConfig};

    async fn orchestrator_with(factory: Arc<dyn BackendFactory>) -> Orchestrator {
        let registry = Arc::new(ServiceRegistry::new(factory));
        registry
            .create("svc", ServiceConfig::new(BackendKind::Caffe, InputKind::Image, std::env::temp_dir()))
            .await
            .expect("create service");
        Orchestrator::new(registry, OrchestratorLimits::default())
    }

    async fn simulated() -> Orchestrator {
        orchestrator_with(Arc::new(SimulatedFactory::new(Duration::from_millis(1), 10))).await
    }

    async fn wait_terminal(orch: &Orchestrator, job: u64) -> StatusReport {
        loop {
            let report = orch.status("svc", job, Duration::from_secs(1)).await.expect("status");
            if report.job.state.is_terminal() {
                return report;
            }
        }
    }

    #[tokio::test]
    async fn sync_train_returns_outcome_and_releases_job() -> anyhow::Result<()> {
        let orch = simulated().await;
        match orch.train("svc", TrainParams::new(50), false).await? {
            TrainResponse::Completed { job, outcome, elapsed } => {
                assert_eq!(job, 1);
                assert_eq!(outcome.iterations, 50);
                assert!(outcome.loss > 0.0);
                assert!(elapsed > Duration::ZERO);
            }
            other => panic!("unexpected response {:?}", other),
        }
        let svc = orch.registry().lookup("svc").await?;
        assert!(svc.jobs().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn async_jobs_get_sequential_ids() -> anyhow::Result<()> {
        let orch = simulated().await;
        let first = orch.train("svc", TrainParams::new(100_000), true).await?;
        let second = orch.train("svc", TrainParams::new(100_000), true).await?;
        assert!(matches!(first, TrainResponse::Started { job: 1, .. }));
        assert!(matches!(second, TrainResponse::Started { job: 2, .. }));
        orch.cancel("svc", 1).await?;
        orch.cancel("svc", 2).await?;
        Ok(())
    }

    #[tokio::test]
    async fn async_train_finishes_with_loss() -> anyhow::Result<()> {
        let orch = simulated().await;
        orch.train("svc", TrainParams::new(40), true).await?;
        let report = wait_terminal(&orch, 1).await;
        assert_eq!(report.job.state, JobState::Finished);
        assert_eq!(report.job.iteration(), Some(40));
        assert!(report.job.loss().unwrap_or_default() > 0.0);

        let again = orch.status("svc", 1, Duration::from_secs(5)).await?;
        assert_eq!(again.job.state, JobState::Finished);
        assert_eq!(again.job.loss(), report.job.loss());
        assert!(again.waited < Duration::from_secs(1));
        Ok(())
    }

    #[tokio::test]
    async fn status_wait_is_clamped() -> anyhow::Result<()> {
        let registry = Arc::new(ServiceRegistry::new(Arc::new(SimulatedFactory::new(Duration::from_secs(1), 1_000))));
        registry
            .create("svc", ServiceConfig::new(BackendKind::Caffe, InputKind::Csv, std::env::temp_dir()))
            .await?;
        let limits = OrchestratorLimits { max_status_wait: Duration::from_millis(50), default_iterations: 10 };
        let orch = Orchestrator::new(registry, limits);
        orch.train("svc", TrainParams::new(1_000), true).await?;
        let report = orch.status("svc", 1, Duration::from_secs(60)).await?;
        assert_eq!(report.job.state, JobState::Running);
        assert!(report.waited < Duration::from_secs(5));
        orch.cancel("svc", 1).await?;
        Ok(())
    }

    #[tokio::test]
    async fn cancel_is_immediate_and_idempotent() -> anyhow::Result<()> {
        let orch = simulated().await;
        orch.train("svc", TrainParams::new(1_000_000), true).await?;
        let first = orch.cancel("svc", 1).await?;
        assert_eq!(first.state, JobState::Terminated);
        let second = orch.cancel("svc", 1).await?;
        assert_eq!(second.state, JobState::Terminated);
        assert_eq!(second.elapsed, first.elapsed);

        let report = orch.status("svc", 1, Duration::from_secs(5)).await?;
        assert_eq!(report.job.state, JobState::Terminated);
        assert!(report.waited < Duration::from_secs(1));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_cancels_agree_on_terminated() -> anyhow::Result<()> {
        let orch = simulated().await;
        orch.train("svc", TrainParams::new(1_000_000), true).await?;
        let (a, b) = tokio::join!(orch.cancel("svc", 1), orch.cancel("svc", 1));
        let (a, b) = (a?, b?);
        assert_eq!(a.state, JobState::Terminated);
        assert_eq!(b.state, JobState::Terminated);
        assert_eq!(a.elapsed, b.elapsed);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_sync_caller_terminates_and_releases_job() -> anyhow::Result<()> {
        let orch = simulated().await;
        let svc = orch.registry().lookup("svc").await?;
        let mut pending = Box::pin(orch.train("svc", TrainParams::new(1_000_000), false));
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut pending).await.is_err());
        let job = svc.jobs().get(1)?;
        assert_eq!(job.state(), JobState::Running);

        drop(pending);
        assert!(job.is_cancelled());
        assert_eq!(job.state(), JobState::Terminated);
        assert!(svc.jobs().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn sync_run_cancelled_after_backend_returns_is_not_reported_done() -> anyhow::Result<()> {
        let backend = Arc::new(MockBackend::new(MockBehavior::IgnoreCancel { step: Duration::from_millis(2) }));
        let orch = Arc::new(orchestrator_with(Arc::new(MockFactory::new(backend))).await);
        let canceller = Arc::clone(&orch);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = canceller.cancel("svc", 1).await;
        });
        let result = orch.train("svc", TrainParams::new(20), false).await;
        assert!(matches!(result, Err(ServiceError::Backend(msg)) if msg.contains("terminated")));
        assert!(orch.registry().lookup("svc").await?.jobs().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn late_worker_updates_do_not_revive_terminated_job() -> anyhow::Result<()> {
        let backend = Arc::new(MockBackend::new(MockBehavior::IgnoreCancel { step: Duration::from_millis(2) }));
        let orch = orchestrator_with(Arc::new(MockFactory::new(backend))).await;
        orch.train("svc", TrainParams::new(20), true).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let cancelled = orch.cancel("svc", 1).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let report = orch.status("svc", 1, Duration::ZERO).await?;
        assert_eq!(report.job.state, JobState::Terminated);
        assert_eq!(report.job.progress, cancelled.progress);
        Ok(())
    }

    #[tokio::test]
    async fn backend_failure_is_recorded_as_error_state() -> anyhow::Result<()> {
        let backend = Arc::new(MockBackend::new(MockBehavior::Fail("diverged".into())));
        let orch = orchestrator_with(Arc::new(MockFactory::new(backend))).await;
        orch.train("svc", TrainParams::new(10), true).await?;
        let report = wait_terminal(&orch, 1).await;
        assert_eq!(report.job.state, JobState::Error);
        assert_eq!(report.job.error.as_deref(), Some("diverged"));

        let sync = orch.train("svc", TrainParams::new(10), false).await;
        assert!(matches!(sync, Err(ServiceError::Backend(msg)) if msg == "diverged"));
        Ok(())
    }

    #[tokio::test]
    async fn worker_panic_is_contained() -> anyhow::Result<()> {
        let backend = Arc::new(MockBackend::new(MockBehavior::Panic));
        let orch = orchestrator_with(Arc::new(MockFactory::new(backend))).await;
        orch.train("svc", TrainParams::new(10), true).await?;
        let report = wait_terminal(&orch, 1).await;
        assert_eq!(report.job.state, JobState::Error);

        let sync = orch.train("svc", TrainParams::new(10), false).await;
        assert!(matches!(sync, Err(ServiceError::Internal(_))));
        Ok(())
    }

    #[tokio::test]
    async fn acknowledge_releases_job() -> anyhow::Result<()> {
        let orch = simulated().await;
        orch.train("svc", TrainParams::new(10), true).await?;
        wait_terminal(&orch, 1).await;
        let snap = orch.acknowledge("svc", 1).await?;
        assert_eq!(snap.state, JobState::Finished);
        assert!(matches!(orch.status("svc", 1, Duration::ZERO).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(orch.acknowledge("svc", 1).await, Err(ServiceError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_service_or_job_is_not_found() {
        let orch = simulated().await;
        assert!(matches!(orch.train("nope", TrainParams::new(1), true).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(orch.status("nope", 1, Duration::ZERO).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(orch.status("svc", 42, Duration::ZERO).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(orch.cancel("svc", 42).await, Err(ServiceError::NotFound(_))));
    }
}

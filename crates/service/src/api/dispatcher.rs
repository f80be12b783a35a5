use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::envelope::{Envelope, Head, JobSummary, ServiceBody, ServiceSummary, TrainBody};
use super::requests::{self, CreateServiceRequest, DeleteJobRequest, StatusRequest, TrainRequest};
use crate::errors::ServiceError;
use crate::jobs::JobState;
use crate::metrics;
use crate::orchestrator::{Orchestrator, TrainResponse};

const TRAIN: &str = "/train";
const SERVICES: &str = "/services";
const INFO: &str = "/info";

/// Entry point for request messages. Every call yields an envelope; errors
/// never escape past this boundary.
pub struct RequestDispatcher {
    orchestrator: Arc<Orchestrator>,
    repository_root: PathBuf,
}

impl RequestDispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>, repository_root: impl Into<PathBuf>) -> Self {
        Self { orchestrator, repository_root: repository_root.into() }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Terminate every running job and drop all services.
    pub async fn shutdown(&self) -> usize {
        self.orchestrator.registry().shutdown().await
    }

    /// Create a service from a JSON definition.
    pub async fn create_service(&self, name: &str, body: &str) -> Envelope {
        let result = match requests::parse::<CreateServiceRequest>(body) {
            Ok(req) => self.try_create_service(name, req).await,
            Err(e) => Err(e),
        };
        render(SERVICES, result)
    }

    async fn try_create_service(&self, name: &str, req: CreateServiceRequest) -> Result<Envelope, ServiceError> {
        let config = req.into_config(&self.repository_root)?;
        self.orchestrator.registry().create(name, config).await?;
        Ok(Envelope::created())
    }

    pub async fn service_info(&self, name: &str) -> Envelope {
        render(SERVICES, self.try_service_info(name).await)
    }

    async fn try_service_info(&self, name: &str) -> Result<Envelope, ServiceError> {
        let service = self.orchestrator.registry().lookup(name).await?;
        let config = service.config();
        let body = ServiceBody {
            name: service.name().to_string(),
            mllib: config.mllib,
            description: config.description.clone(),
            learning: config.learning,
            input: config.input,
            repository: config.repository.display().to_string(),
            created: service.created_at().to_rfc3339(),
            jobs: service.jobs().list().iter().map(JobSummary::from).collect(),
        };
        Ok(Envelope::ok().with_head(Head::new(SERVICES)).with_service_body(body))
    }

    pub async fn delete_service(&self, name: &str) -> Envelope {
        let result = self.orchestrator.registry().delete(name).await.map(|_| Envelope::ok());
        render(SERVICES, result)
    }

    /// List registered services.
    pub async fn info(&self) -> Envelope {
        let services = self
            .orchestrator
            .registry()
            .list()
            .await
            .iter()
            .map(|s| ServiceSummary {
                name: s.name().to_string(),
                mllib: s.config().mllib,
                description: s.config().description.clone(),
            })
            .collect();
        let mut head = Head::new(INFO);
        head.version = Some(env!("CARGO_PKG_VERSION"));
        head.services = Some(services);
        render(INFO, Ok(Envelope::ok().with_head(head)))
    }

    /// Submit training from a JSON message.
    pub async fn train(&self, body: &str) -> Envelope {
        match requests::parse::<TrainRequest>(body) {
            Ok(req) => self.train_request(req).await,
            Err(e) => render(TRAIN, Err(e)),
        }
    }

    pub async fn train_request(&self, req: TrainRequest) -> Envelope {
        render(TRAIN, self.try_train(req).await)
    }

    async fn try_train(&self, req: TrainRequest) -> Result<Envelope, ServiceError> {
        let params = req.params(self.orchestrator.limits().default_iterations)?;
        let response = self.orchestrator.train(&req.service, params, req.run_async).await?;
        let envelope = match response {
            TrainResponse::Completed { outcome, elapsed, .. } => Envelope::created()
                .with_head(Head::new(TRAIN).time(elapsed))
                .with_train_body(TrainBody { loss: Some(outcome.loss), iteration: Some(outcome.iterations), error: None }),
            TrainResponse::Started { job, elapsed } => Envelope::created().with_head(
                Head::new(TRAIN).time(elapsed).job(job).status(JobState::Running),
            ),
        };
        Ok(envelope)
    }

    /// Render a `/train` request rejected before it reached the dispatcher,
    /// e.g. an undecodable query string.
    pub fn reject_train(&self, err: ServiceError) -> Envelope {
        render(TRAIN, Err(err))
    }

    /// Long-poll a job's status from a JSON message.
    pub async fn train_status(&self, body: &str) -> Envelope {
        match requests::parse::<StatusRequest>(body) {
            Ok(req) => self.train_status_request(req).await,
            Err(e) => render(TRAIN, Err(e)),
        }
    }

    pub async fn train_status_request(&self, req: StatusRequest) -> Envelope {
        render(TRAIN, self.try_train_status(req).await)
    }

    async fn try_train_status(&self, req: StatusRequest) -> Result<Envelope, ServiceError> {
        let max_wait = req.max_wait()?;
        let report = self.orchestrator.status(&req.service, req.job, max_wait).await?;
        Ok(Envelope::ok()
            .with_head(Head::new(TRAIN).time(report.waited).job(report.job.id).status(report.job.state))
            .with_train_body(TrainBody::from_snapshot(&report.job)))
    }

    /// Cancel (and optionally clear) a job from a JSON message.
    pub async fn train_delete(&self, body: &str) -> Envelope {
        match requests::parse::<DeleteJobRequest>(body) {
            Ok(req) => self.train_delete_request(req).await,
            Err(e) => render(TRAIN, Err(e)),
        }
    }

    pub async fn train_delete_request(&self, req: DeleteJobRequest) -> Envelope {
        render(TRAIN, self.try_train_delete(req).await)
    }

    async fn try_train_delete(&self, req: DeleteJobRequest) -> Result<Envelope, ServiceError> {
        let started = Instant::now();
        let snapshot = if req.clear {
            self.orchestrator.acknowledge(&req.service, req.job).await?
        } else {
            self.orchestrator.cancel(&req.service, req.job).await?
        };
        debug!(service = %req.service, job = req.job, took_us = started.elapsed().as_micros() as u64, "delete handled");
        Ok(Envelope::ok()
            .with_head(Head::new(TRAIN).time(snapshot.elapsed).job(snapshot.id).status(snapshot.state))
            .with_train_body(TrainBody::from_snapshot(&snapshot)))
    }
}

fn render(method: &'static str, result: Result<Envelope, ServiceError>) -> Envelope {
    let envelope = match result {
        Ok(envelope) => envelope,
        Err(e) => {
            match &e {
                ServiceError::Backend(_) | ServiceError::Internal(_) => warn!(method, error = %e, "request failed"),
                _ => debug!(method, error = %e, "request rejected"),
            }
            Envelope::from_error(&e)
        }
    };
    metrics::REQUESTS_TOTAL
        .with_label_values(&[method, &envelope.code().to_string()])
        .inc();
    envelope
}

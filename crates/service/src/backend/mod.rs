//! Capability interface to the training libraries.
//!
//! The orchestrator only sees a [`Backend`]: it hands over [`TrainParams`]
//! and a [`TrainContext`] through which the backend reports progress and
//! checks for cancellation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::errors::ServiceError;
use crate::jobs::Job;
use crate::registry::ServiceConfig;

pub mod mock;
pub mod simulated;

pub use simulated::{SimulatedFactory, SimulatedSolver};

/// Training library a service is bound to (`mllib`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Caffe,
}

impl BackendKind {
    pub const ALL: [BackendKind; 1] = [BackendKind::Caffe];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Caffe => "caffe",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ServiceError::BadRequest(format!("unknown mllib '{}'", s)))
    }
}

/// Solver parameters of one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainParams {
    pub iterations: u64,
    pub base_lr: Option<f64>,
    /// Report progress every `display` iterations.
    pub display: Option<u64>,
}

impl TrainParams {
    pub fn new(iterations: u64) -> Self {
        Self { iterations, base_lr: None, display: None }
    }
}

/// Final metric of a successful run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOutcome {
    pub iterations: u64,
    pub loss: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("training cancelled")]
    Cancelled,
    #[error("training failed: {0}")]
    Failed(String),
}

/// Handle given to a backend for the duration of one run.
pub struct TrainContext {
    job: Arc<Job>,
}

impl TrainContext {
    pub(crate) fn new(job: Arc<Job>) -> Self {
        Self { job }
    }

    pub fn job_id(&self) -> u64 {
        self.job.id()
    }

    /// Publish progress. Returns `false` when the update was discarded,
    /// typically because the job was already terminated.
    pub fn report(&self, iteration: u64, loss: f64) -> bool {
        self.job.update_progress(iteration, loss)
    }

    pub fn is_cancelled(&self) -> bool {
        self.job.is_cancelled()
    }

    /// Completes once the job is cancelled.
    pub async fn cancelled(&self) {
        self.job.cancellation().cancelled().await
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Run training to completion, cancellation or failure.
    async fn train(&self, params: &TrainParams, ctx: &TrainContext) -> Result<TrainOutcome, BackendError>;
}

/// Builds the backend instance of a service at creation time.
pub trait BackendFactory: Send + Sync {
    fn build(&self, config: &ServiceConfig) -> Result<Arc<dyn Backend>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("caffe".parse::<BackendKind>().unwrap(), BackendKind::Caffe);
        assert_eq!(" Caffe ".parse::<BackendKind>().unwrap(), BackendKind::Caffe);
        assert!(matches!("torch".parse::<BackendKind>(), Err(ServiceError::BadRequest(_))));
        assert_eq!(BackendKind::Caffe.to_string(), "caffe");
    }

    #[tokio::test]
    async fn context_reports_into_job() {
        let job = Arc::new(Job::new(4));
        let ctx = TrainContext::new(Arc::clone(&job));
        assert_eq!(ctx.job_id(), 4);
        assert!(ctx.report(1, 0.5));
        assert!(!ctx.is_cancelled());
        job.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
        assert!(!ctx.report(2, 0.4));
    }
}

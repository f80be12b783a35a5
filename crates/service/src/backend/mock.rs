//! Scripted backends for tests and embedders wiring their own factory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Backend, BackendError, BackendFactory, BackendKind, TrainContext, TrainOutcome, TrainParams};
use crate::errors::ServiceError;
use crate::registry::ServiceConfig;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Report once, then fail with the message.
    Fail(String),
    /// Keep reporting after cancellation and finish anyway, simulating a
    /// backend that only notices the signal late.
    IgnoreCancel { step: Duration },
    /// Panic inside the worker.
    Panic,
}

#[derive(Debug, Clone)]
pub struct MockBackend {
    behavior: MockBehavior,
}

impl MockBackend {
    pub fn new(behavior: MockBehavior) -> Self {
        Self { behavior }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Caffe
    }

    async fn train(&self, params: &TrainParams, ctx: &TrainContext) -> Result<TrainOutcome, BackendError> {
        match &self.behavior {
            MockBehavior::Fail(msg) => {
                ctx.report(1, 1.0);
                Err(BackendError::Failed(msg.clone()))
            }
            MockBehavior::IgnoreCancel { step } => {
                let mut loss = 1.0;
                for iteration in 1..=params.iterations {
                    tokio::time::sleep(*step).await;
                    loss = 1.0 / (iteration as f64 + 1.0);
                    ctx.report(iteration, loss);
                }
                Ok(TrainOutcome { iterations: params.iterations, loss })
            }
            MockBehavior::Panic => panic!("mock backend panic"),
        }
    }
}

/// Factory returning the same backend for every service.
pub struct MockFactory {
    backend: Arc<dyn Backend>,
}

impl MockFactory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl BackendFactory for MockFactory {
    fn build(&self, _config: &ServiceConfig) -> Result<Arc<dyn Backend>, ServiceError> {
        Ok(Arc::clone(&self.backend))
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Backend, BackendError, BackendFactory, BackendKind, TrainContext, TrainOutcome, TrainParams};
use crate::errors::ServiceError;
use crate::registry::ServiceConfig;

const INITIAL_LOSS: f64 = 2.3;
const LOSS_FLOOR: f64 = 0.05;
const DEFAULT_BASE_LR: f64 = 0.01;

/// Stand-in solver producing a decaying, strictly positive loss curve.
///
/// Sleeps `step` per iteration and stops at the next iteration boundary
/// after cancellation.
#[derive(Debug, Clone)]
pub struct SimulatedSolver {
    kind: BackendKind,
    step: Duration,
    display: u64,
}

impl SimulatedSolver {
    pub fn new(kind: BackendKind, step: Duration, display: u64) -> Self {
        Self { kind, step, display: display.max(1) }
    }

    /// Loss after `iteration` steps.
    pub fn loss_at(iteration: u64, base_lr: f64) -> f64 {
        LOSS_FLOOR + (INITIAL_LOSS - LOSS_FLOOR) * (-base_lr * 0.05 * iteration as f64).exp()
    }
}

#[async_trait]
impl Backend for SimulatedSolver {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn train(&self, params: &TrainParams, ctx: &TrainContext) -> Result<TrainOutcome, BackendError> {
        if params.iterations == 0 {
            return Err(BackendError::Failed("iterations must be >= 1".into()));
        }
        let base_lr = params.base_lr.unwrap_or(DEFAULT_BASE_LR);
        if !base_lr.is_finite() || base_lr <= 0.0 {
            return Err(BackendError::Failed(format!("invalid base_lr {}", base_lr)));
        }
        let display = params.display.unwrap_or(self.display).max(1);

        let mut loss = INITIAL_LOSS;
        for iteration in 1..=params.iterations {
            if ctx.is_cancelled() {
                debug!(job = ctx.job_id(), iteration, "solver observed cancellation");
                return Err(BackendError::Cancelled);
            }
            if self.step.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = ctx.cancelled() => return Err(BackendError::Cancelled),
                    _ = tokio::time::sleep(self.step) => {}
                }
            }
            loss = Self::loss_at(iteration, base_lr);
            if iteration % display == 0 || iteration == params.iterations {
                ctx.report(iteration, loss);
            }
        }
        Ok(TrainOutcome { iterations: params.iterations, loss })
    }
}

/// Binds every backend kind to a [`SimulatedSolver`].
#[derive(Debug, Clone)]
pub struct SimulatedFactory {
    step: Duration,
    display: u64,
}

impl SimulatedFactory {
    pub fn new(step: Duration, display: u64) -> Self {
        Self { step, display }
    }
}

impl BackendFactory for SimulatedFactory {
    fn build(&self, config: &ServiceConfig) -> Result<Arc<dyn Backend>, ServiceError> {
        let display = match config.parameters.pointer("/mllib/solver/display") {
            Some(v) => v
                .as_u64()
                .filter(|d| *d > 0)
                .ok_or_else(|| ServiceError::BadRequest("parameters.mllib.solver.display must be a positive integer".into()))?,
            None => self.display,
        };
        Ok(Arc::new(SimulatedSolver::new(config.mllib, self.step, display)))
    }
}

//! Runtime wiring helpers
//!
//! Thin layer that keeps binary crates from assembling the registry,
//! orchestrator and dispatcher by hand.

use std::sync::Arc;

use configs::AppConfig;

use crate::api::RequestDispatcher;
use crate::backend::{BackendFactory, SimulatedFactory};
use crate::orchestrator::{Orchestrator, OrchestratorLimits};
use crate::registry::ServiceRegistry;

/// Ensure the model repository root exists.
pub async fn ensure_env(repository_root: &str) -> anyhow::Result<()> {
    common::env::ensure_env(repository_root).await
}

/// Build a dispatcher backed by the simulated solver for every backend kind.
pub fn build_dispatcher(cfg: &AppConfig) -> Arc<RequestDispatcher> {
    let factory = Arc::new(SimulatedFactory::new(cfg.simulator.step(), cfg.simulator.display));
    build_dispatcher_with(cfg, factory)
}

/// Build a dispatcher with an injected backend factory.
pub fn build_dispatcher_with(cfg: &AppConfig, factory: Arc<dyn BackendFactory>) -> Arc<RequestDispatcher> {
    let registry = Arc::new(ServiceRegistry::new(factory));
    let orchestrator = Arc::new(Orchestrator::new(registry, OrchestratorLimits::from(&cfg.orchestrator)));
    Arc::new(RequestDispatcher::new(orchestrator, &cfg.orchestrator.repository_root))
}

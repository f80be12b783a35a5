use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend::{Backend, BackendFactory, BackendKind};
use crate::errors::ServiceError;
use crate::jobs::JobTable;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningType {
    Supervised,
    Unsupervised,
}

impl FromStr for LearningType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supervised" => Ok(LearningType::Supervised),
            "unsupervised" => Ok(LearningType::Unsupervised),
            other => Err(ServiceError::BadRequest(format!("unknown service type '{}'", other))),
        }
    }
}

/// Input connector a service expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Image,
    Csv,
    Txt,
}

impl FromStr for InputKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(InputKind::Image),
            "csv" => Ok(InputKind::Csv),
            "txt" => Ok(InputKind::Txt),
            other => Err(ServiceError::BadRequest(format!("unknown input '{}'", other))),
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputKind::Image => "image",
            InputKind::Csv => "csv",
            InputKind::Txt => "txt",
        })
    }
}

/// Validated service definition.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfig {
    pub mllib: BackendKind,
    pub description: String,
    #[serde(rename = "type")]
    pub learning: LearningType,
    pub input: InputKind,
    pub repository: PathBuf,
    /// Backend-specific options, passed through to the factory.
    pub parameters: serde_json::Value,
}

impl ServiceConfig {
    pub fn new(mllib: BackendKind, input: InputKind, repository: impl Into<PathBuf>) -> Self {
        Self {
            mllib,
            description: String::new(),
            learning: LearningType::Supervised,
            input,
            repository: repository.into(),
            parameters: serde_json::Value::Null,
        }
    }
}

/// A named service: backend instance plus its job table.
pub struct Service {
    name: String,
    config: ServiceConfig,
    backend: Arc<dyn Backend>,
    jobs: JobTable,
    created_at: DateTime<Utc>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Terminate all running jobs of this service.
    pub fn shutdown(&self) -> usize {
        self.jobs.cancel_all()
    }
}

fn validate_name(name: &str) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        return Err(ServiceError::BadRequest("service name must not be empty".into()));
    }
    if name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(ServiceError::BadRequest(format!("invalid service name '{}'", name)));
    }
    Ok(())
}

/// Name → service map. Mutated only on create/delete, so one coarse lock.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<Service>>>,
    factory: Arc<dyn BackendFactory>,
}

impl ServiceRegistry {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self { services: RwLock::new(HashMap::new()), factory }
    }

    /// Register a new service. Duplicate names are rejected with `Conflict`.
    pub async fn create(&self, name: &str, config: ServiceConfig) -> Result<Arc<Service>, ServiceError> {
        validate_name(name)?;
        common::env::check_repository(&config.repository).await;

        let mut services = self.services.write().await;
        if services.contains_key(name) {
            return Err(ServiceError::Conflict(format!("service '{}' already exists", name)));
        }
        let backend = self.factory.build(&config)?;
        let service = Arc::new(Service {
            name: name.to_string(),
            config,
            backend,
            jobs: JobTable::new(),
            created_at: Utc::now(),
        });
        services.insert(name.to_string(), Arc::clone(&service));
        metrics::SERVICES.set(services.len() as i64);
        drop(services);

        info!(service = %name, mllib = %service.config.mllib, input = %service.config.input, "service created");
        Ok(service)
    }

    pub async fn lookup(&self, name: &str) -> Result<Arc<Service>, ServiceError> {
        let services = self.services.read().await;
        services.get(name).cloned().ok_or_else(|| ServiceError::service_not_found(name))
    }

    /// All services, ordered by name.
    pub async fn list(&self) -> Vec<Arc<Service>> {
        let services = self.services.read().await;
        let mut out: Vec<Arc<Service>> = services.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Remove a service, terminating its running jobs first.
    pub async fn delete(&self, name: &str) -> Result<Arc<Service>, ServiceError> {
        let mut services = self.services.write().await;
        let service = services.remove(name).ok_or_else(|| ServiceError::service_not_found(name))?;
        metrics::SERVICES.set(services.len() as i64);
        drop(services);

        let stopped = service.shutdown();
        if stopped > 0 {
            warn!(service = %name, stopped, "service deleted with running jobs");
        }
        info!(service = %name, "service deleted");
        Ok(service)
    }

    /// Stop every job and drop all services.
    pub async fn shutdown(&self) -> usize {
        let mut services = self.services.write().await;
        let stopped: usize = services.values().map(|s| s.shutdown()).sum();
        services.clear();
        metrics::SERVICES.set(0);
        info!(stopped, "service registry shut down");
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedFactory;
    use std::time::Duration;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(SimulatedFactory::new(Duration::from_millis(1), 10)))
    }

    fn config() -> ServiceConfig {
        ServiceConfig::new(BackendKind::Caffe, InputKind::Image, std::env::temp_dir())
    }

    #[tokio::test]
    async fn create_then_lookup() -> anyhow::Result<()> {
        let reg = registry();
        reg.create("svc", config()).await?;
        let found = reg.lookup("svc").await?;
        assert_eq!(found.name(), "svc");
        assert_eq!(found.backend().kind(), BackendKind::Caffe);
        assert!(found.jobs().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() -> anyhow::Result<()> {
        let reg = registry();
        reg.create("svc", config()).await?;
        assert!(matches!(reg.create("svc", config()).await, Err(ServiceError::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let reg = registry();
        for name in ["", "  ", "a/b", "a b"] {
            assert!(matches!(reg.create(name, config()).await, Err(ServiceError::BadRequest(_))));
        }
    }

    #[tokio::test]
    async fn delete_cancels_running_jobs() -> anyhow::Result<()> {
        let reg = registry();
        let svc = reg.create("svc", config()).await?;
        let job = svc.jobs().allocate();
        reg.delete("svc").await?;
        assert!(job.is_cancelled());
        assert!(matches!(reg.lookup("svc").await, Err(ServiceError::NotFound(_))));
        assert!(matches!(reg.delete("svc").await, Err(ServiceError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn list_is_sorted_and_shutdown_clears() -> anyhow::Result<()> {
        let reg = registry();
        reg.create("b", config()).await?;
        let a = reg.create("a", config()).await?;
        a.jobs().allocate();
        let names: Vec<String> = reg.list().await.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(reg.shutdown().await, 1);
        assert!(reg.list().await.is_empty());
        Ok(())
    }

    #[test]
    fn enums_parse() {
        assert_eq!("Image".parse::<InputKind>().unwrap(), InputKind::Image);
        assert!("video".parse::<InputKind>().is_err());
        assert_eq!("unsupervised".parse::<LearningType>().unwrap(), LearningType::Unsupervised);
        assert!("reinforcement".parse::<LearningType>().is_err());
    }
}

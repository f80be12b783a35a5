//! Inbound request messages and their validation.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::backend::{BackendKind, TrainParams};
use crate::errors::ServiceError;
use crate::registry::{InputKind, LearningType, ServiceConfig};

/// Parse a JSON message, mapping any syntax or shape error to `BadRequest`.
pub fn parse<T: DeserializeOwned>(body: &str) -> Result<T, ServiceError> {
    serde_json::from_str(body).map_err(|e| ServiceError::BadRequest(format!("invalid request: {}", e)))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    pub repository: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateServiceRequest {
    pub mllib: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default = "default_learning")]
    pub learning: String,
    pub model: ModelSection,
    pub input: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

fn default_learning() -> String {
    "supervised".into()
}

impl CreateServiceRequest {
    /// Validate and resolve a relative repository against `repository_root`.
    pub fn into_config(self, repository_root: &Path) -> Result<ServiceConfig, ServiceError> {
        let mllib: BackendKind = self.mllib.parse()?;
        let learning: LearningType = self.learning.parse()?;
        let input: InputKind = self.input.parse()?;
        let repo = self.model.repository.trim();
        if repo.is_empty() {
            return Err(ServiceError::BadRequest("model.repository must not be empty".into()));
        }
        if !(self.parameters.is_null() || self.parameters.is_object()) {
            return Err(ServiceError::BadRequest("parameters must be an object".into()));
        }
        let repo = Path::new(repo);
        let repository = if repo.is_absolute() { repo.to_path_buf() } else { repository_root.join(repo) };
        Ok(ServiceConfig {
            mllib,
            description: self.description,
            learning,
            input,
            repository,
            parameters: self.parameters,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverParameters {
    pub iterations: Option<u64>,
    pub base_lr: Option<f64>,
    pub display: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MllibParameters {
    #[serde(default)]
    pub solver: SolverParameters,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainParameters {
    #[serde(default)]
    pub mllib: MllibParameters,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainRequest {
    pub service: String,
    #[serde(rename = "async", default)]
    pub run_async: bool,
    #[serde(default)]
    pub parameters: TrainParameters,
}

impl TrainRequest {
    pub fn params(&self, default_iterations: u64) -> Result<TrainParams, ServiceError> {
        let solver = &self.parameters.mllib.solver;
        let iterations = solver.iterations.unwrap_or(default_iterations);
        if iterations == 0 {
            return Err(ServiceError::BadRequest("solver.iterations must be >= 1".into()));
        }
        if let Some(lr) = solver.base_lr {
            if !lr.is_finite() || lr <= 0.0 {
                return Err(ServiceError::BadRequest("solver.base_lr must be a positive number".into()));
            }
        }
        if solver.display == Some(0) {
            return Err(ServiceError::BadRequest("solver.display must be >= 1".into()));
        }
        Ok(TrainParams { iterations, base_lr: solver.base_lr, display: solver.display })
    }
}

/// Long-poll status query. Also decodes from a URL query string.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub service: String,
    pub job: u64,
    /// Maximum wait in seconds.
    #[serde(default)]
    pub timeout: f64,
}

impl StatusRequest {
    pub fn max_wait(&self) -> Result<Duration, ServiceError> {
        if !self.timeout.is_finite() || self.timeout < 0.0 {
            return Err(ServiceError::BadRequest("timeout must be a non-negative number of seconds".into()));
        }
        // Out-of-range budgets saturate; the orchestrator clamps them.
        Ok(Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::MAX))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteJobRequest {
    pub service: String,
    pub job: u64,
    /// Also release the job record.
    #[serde(default)]
    pub clear: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_resolves_relative_repository() -> anyhow::Result<()> {
        let req: CreateServiceRequest = parse(
            r#"{"mllib":"caffe","description":"my classifier","type":"supervised","model":{"repository":"mnist"},"input":"image"}"#,
        )?;
        let cfg = req.into_config(Path::new("/srv/models"))?;
        assert_eq!(cfg.mllib, BackendKind::Caffe);
        assert_eq!(cfg.learning, LearningType::Supervised);
        assert_eq!(cfg.input, InputKind::Image);
        assert_eq!(cfg.repository, Path::new("/srv/models/mnist"));
        assert_eq!(cfg.description, "my classifier");
        Ok(())
    }

    #[test]
    fn create_request_rejects_unknown_values() -> anyhow::Result<()> {
        let unknown_lib: CreateServiceRequest =
            parse(r#"{"mllib":"torch","model":{"repository":"/m"},"input":"image"}"#)?;
        assert!(matches!(unknown_lib.into_config(Path::new("/")), Err(ServiceError::BadRequest(_))));

        let empty_repo: CreateServiceRequest = parse(r#"{"mllib":"caffe","model":{"repository":" "},"input":"csv"}"#)?;
        assert!(matches!(empty_repo.into_config(Path::new("/")), Err(ServiceError::BadRequest(_))));

        let bad_params: CreateServiceRequest =
            parse(r#"{"mllib":"caffe","model":{"repository":"/m"},"input":"txt","parameters":[1]}"#)?;
        assert!(matches!(bad_params.into_config(Path::new("/")), Err(ServiceError::BadRequest(_))));

        assert!(matches!(parse::<CreateServiceRequest>(r#"{"mllib":"caffe"}"#), Err(ServiceError::BadRequest(_))));
        assert!(matches!(parse::<CreateServiceRequest>("not json"), Err(ServiceError::BadRequest(_))));
        Ok(())
    }

    #[test]
    fn train_request_reads_solver_iterations() -> anyhow::Result<()> {
        let req: TrainRequest =
            parse(r#"{"service":"s","async":true,"parameters":{"mllib":{"solver":{"iterations":150}}}}"#)?;
        assert!(req.run_async);
        assert_eq!(req.params(10)?.iterations, 150);

        let defaulted: TrainRequest = parse(r#"{"service":"s"}"#)?;
        assert!(!defaulted.run_async);
        assert_eq!(defaulted.params(10)?.iterations, 10);

        let zero: TrainRequest = parse(r#"{"service":"s","parameters":{"mllib":{"solver":{"iterations":0}}}}"#)?;
        assert!(zero.params(10).is_err());
        let lr: TrainRequest = parse(r#"{"service":"s","parameters":{"mllib":{"solver":{"base_lr":-0.1}}}}"#)?;
        assert!(lr.params(10).is_err());
        Ok(())
    }

    #[test]
    fn status_request_validates_timeout() -> anyhow::Result<()> {
        let req: StatusRequest = parse(r#"{"service":"s","job":1,"timeout":5}"#)?;
        assert_eq!(req.max_wait()?, Duration::from_secs(5));
        let no_timeout: StatusRequest = parse(r#"{"service":"s","job":1}"#)?;
        assert_eq!(no_timeout.max_wait()?, Duration::ZERO);
        let negative: StatusRequest = parse(r#"{"service":"s","job":1,"timeout":-1}"#)?;
        assert!(negative.max_wait().is_err());
        assert!(parse::<StatusRequest>(r#"{"service":"s","job":-1}"#).is_err());
        let huge: StatusRequest = parse(r#"{"service":"s","job":1,"timeout":1e20}"#)?;
        assert_eq!(huge.max_wait()?, Duration::MAX);
        Ok(())
    }
}

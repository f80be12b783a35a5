use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::errors::ServiceError;
use crate::jobs::{JobSnapshot, JobState};
use crate::registry::{InputKind, LearningType};
use crate::backend::BackendKind;

/// Protocol outcome, distinct from the job lifecycle state in `head.status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub code: u16,
    pub msg: &'static str,
}

impl Status {
    pub const fn ok() -> Self { Self { code: 200, msg: "OK" } }
    pub const fn created() -> Self { Self { code: 201, msg: "Created" } }
    pub const fn bad_request() -> Self { Self { code: 400, msg: "BadRequest" } }
    pub const fn not_found() -> Self { Self { code: 404, msg: "NotFound" } }
    pub const fn conflict() -> Self { Self { code: 409, msg: "Conflict" } }
    pub const fn internal() -> Self { Self { code: 500, msg: "InternalError" } }

    pub fn from_code(code: u16) -> Self {
        match code {
            200 => Self::ok(),
            201 => Self::created(),
            400 => Self::bad_request(),
            404 => Self::not_found(),
            409 => Self::conflict(),
            _ => Self::internal(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub mllib: BackendKind,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Head {
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServiceSummary>>,
}

impl Head {
    pub fn new(method: &'static str) -> Self {
        Self { method, time: None, job: None, status: None, version: None, services: None }
    }

    pub fn time(mut self, elapsed: Duration) -> Self {
        self.time = Some(elapsed.as_secs_f64());
        self
    }

    pub fn job(mut self, id: u64) -> Self {
        self.job = Some(id);
        self
    }

    pub fn status(mut self, state: JobState) -> Self {
        self.status = Some(state);
        self
    }
}

/// Metric part of a `/train` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrainBody {
    pub fn from_snapshot(snap: &JobSnapshot) -> Self {
        Self { loss: snap.loss(), iteration: snap.iteration(), error: snap.error.clone() }
    }

    fn is_empty(&self) -> bool {
        self.loss.is_none() && self.iteration.is_none() && self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job: u64,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    pub time: f64,
}

impl From<&JobSnapshot> for JobSummary {
    fn from(snap: &JobSnapshot) -> Self {
        Self {
            job: snap.id,
            status: snap.state,
            iteration: snap.iteration(),
            loss: snap.loss(),
            time: snap.elapsed.as_secs_f64(),
        }
    }
}

/// Description of one service for `/services/{name}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceBody {
    pub name: String,
    pub mllib: BackendKind,
    pub description: String,
    #[serde(rename = "type")]
    pub learning: LearningType,
    pub input: InputKind,
    pub repository: String,
    pub created: String,
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Body {
    Train(TrainBody),
    Service(ServiceBody),
}

/// Uniform response: `{status, head?, body?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Head>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

impl Envelope {
    pub fn new(status: Status) -> Self {
        Self { status, head: None, body: None }
    }

    pub fn ok() -> Self { Self::new(Status::ok()) }

    pub fn created() -> Self { Self::new(Status::created()) }

    pub fn with_head(mut self, head: Head) -> Self {
        self.head = Some(head);
        self
    }

    /// Attach a train body, omitted when it carries nothing.
    pub fn with_train_body(mut self, body: TrainBody) -> Self {
        if !body.is_empty() {
            self.body = Some(Body::Train(body));
        }
        self
    }

    pub fn with_service_body(mut self, body: ServiceBody) -> Self {
        self.body = Some(Body::Service(body));
        self
    }

    pub fn from_error(err: &ServiceError) -> Self {
        Self::new(Status::from_code(err.code()))
    }

    pub fn code(&self) -> u16 {
        self.status.code
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"status\":{{\"code\":500,\"msg\":\"{}\"}}}}", Status::internal().msg)
        })
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_envelopes_render_exactly() {
        assert_eq!(Envelope::created().to_json_string(), r#"{"status":{"code":201,"msg":"Created"}}"#);
        assert_eq!(Envelope::ok().to_json_string(), r#"{"status":{"code":200,"msg":"OK"}}"#);
        let nf = Envelope::from_error(&ServiceError::service_not_found("x"));
        assert_eq!(nf.to_json_string(), r#"{"status":{"code":404,"msg":"NotFound"}}"#);
        let bad = Envelope::from_error(&ServiceError::BadRequest("x".into()));
        assert_eq!(bad.to_json_string(), r#"{"status":{"code":400,"msg":"BadRequest"}}"#);
    }

    #[test]
    fn head_and_body_render_in_order() {
        let env = Envelope::ok()
            .with_head(Head::new("/train").time(Duration::from_millis(1500)).job(1).status(JobState::Running))
            .with_train_body(TrainBody { loss: Some(0.5), iteration: Some(10), error: None });
        assert_eq!(
            env.to_json_string(),
            r#"{"status":{"code":200,"msg":"OK"},"head":{"method":"/train","time":1.5,"job":1,"status":"running"},"body":{"loss":0.5,"iteration":10}}"#
        );
    }

    #[test]
    fn empty_train_body_is_omitted() {
        let env = Envelope::created().with_head(Head::new("/train")).with_train_body(TrainBody::default());
        assert!(env.body.is_none());
    }

    #[test]
    fn into_response_uses_envelope_code() {
        let resp = Envelope::from_error(&ServiceError::Conflict("dup".into())).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn service_not_found(name: &str) -> Self { Self::NotFound(format!("service '{}' not found", name)) }

    pub fn job_not_found(id: u64) -> Self { Self::NotFound(format!("job {} not found", id)) }

    /// Protocol status code carried by the response envelope.
    pub fn code(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Backend(_) | ServiceError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ServiceError::BadRequest("x".into()).code(), 400);
        assert_eq!(ServiceError::service_not_found("svc").code(), 404);
        assert_eq!(ServiceError::job_not_found(3).to_string(), "not found: job 3 not found");
        assert_eq!(ServiceError::Conflict("x".into()).code(), 409);
        assert_eq!(ServiceError::Backend("x".into()).code(), 500);
        assert_eq!(ServiceError::Internal("x".into()).code(), 500);
    }
}

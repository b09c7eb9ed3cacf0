use http::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::core::event::{EdgeResponse, Stage};

/// Errors surfaced by the lifecycle engine.
///
/// Each variant maps to an HTTP status through [`EdgeError::status_code`];
/// the HTTP boundary renders them as a JSON `{code, message}` body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EdgeError {
    /// Request method is not in the hook set's allowed methods
    #[error("Method {method} is not allowed")]
    MethodNotAllowed { method: String },

    /// Origin could not resolve the requested resource
    #[error("{0}")]
    NotFound(String),

    /// Malformed origin, missing response and other engine faults
    #[error("{0}")]
    InternalServerError(String),

    /// A hook returned an error or an unusable result
    #[error("Hook failed at {stage}: {message}")]
    Hook { stage: Stage, message: String },

    /// Cache persistence failure
    #[error("Cache error: {0}")]
    Cache(String),
}

/// Result type for lifecycle operations
pub type EdgeResult<T> = Result<T, EdgeError>;

impl EdgeError {
    pub fn hook(stage: Stage, message: impl Into<String>) -> Self {
        Self::Hook {
            stage,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EdgeError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            EdgeError::NotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::InternalServerError(_) | EdgeError::Hook { .. } | EdgeError::Cache(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// JSON payload `{code, message}`.
    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "code": self.status_code().as_u16(),
            "message": self.to_string(),
        })
    }

    /// Render as an ordinary edge response so it can keep flowing through stages.
    pub fn into_response(self) -> EdgeResponse {
        EdgeResponse::new(self.status_code().as_u16())
            .with_header("Content-Type", "application/json")
            .with_body(self.to_body().to_string())
    }
}

impl From<crate::ports::cache_store::CacheStoreError> for EdgeError {
    fn from(err: crate::ports::cache_store::CacheStoreError) -> Self {
        EdgeError::Cache(err.to_string())
    }
}

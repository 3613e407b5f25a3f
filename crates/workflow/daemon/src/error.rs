//! Error types for approvald

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use workflow_engine::EngineError;
use workflow_types::ValidationError;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Principal may not act on the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict with the current state of the request
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Definition rejected at publish
    #[error("Definition failed validation with {} error(s)", .0.len())]
    InvalidDefinition(Vec<ValidationError>),

    /// A collaborator the engine depends on is down
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::DefinitionNotFound(_)
            | EngineError::DefinitionVersionNotFound { .. }
            | EngineError::InstanceNotFound(_) => ApiError::NotFound(message),
            EngineError::InvalidDefinition(errors) => ApiError::InvalidDefinition(errors),
            EngineError::FieldTypeMismatch { .. }
            | EngineError::NotAnApprovalStep(_)
            | EngineError::InvalidDecision(_) => ApiError::Validation(message),
            EngineError::UnauthorizedPrincipal { .. } => ApiError::Forbidden(message),
            EngineError::DuplicateDecision { .. }
            | EngineError::StepNotActive { .. }
            | EngineError::InstanceTerminal(_)
            | EngineError::InstanceBlocked { .. } => ApiError::Conflict(message),
            EngineError::Directory(_) => ApiError::Unavailable(message),
            EngineError::Store(_) | EngineError::Invariant(_) => {
                tracing::error!(error = %message, "Engine failure surfaced to API");
                ApiError::Internal(message)
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Validation(_) | ApiError::InvalidDefinition(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
            }
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let details = match &self {
            ApiError::InvalidDefinition(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

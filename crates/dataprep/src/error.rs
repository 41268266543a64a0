//! Error types for the preprocessing service

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for preprocessing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Preprocessing service errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource is locked and the caller asked not to wait
    #[error("Resource '{0}' is busy")]
    ResourceBusy(String),

    /// Resource lock was not released within the allowed wait
    #[error("Timed out after {timeout:?} waiting for access to '{resource_id}'")]
    LockTimeout {
        resource_id: String,
        timeout: Duration,
    },

    /// Unknown dataset, result or job id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed pipeline config, parameters or dataset
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request body over the configured upload limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Uploaded bytes could not be turned into a table
    #[error("Failed to parse '{filename}': {message}")]
    Parse { filename: String, message: String },

    /// A pipeline step raised during execution
    #[error("Step {step_index} ({method_id}) failed: {message}")]
    TransformFailure {
        step_index: usize,
        method_id: String,
        message: String,
    },

    /// Persisting a state document or artifact failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The job queue has no free slot
    #[error("Job queue is full ({0} jobs waiting)")]
    QueueFull(usize),

    /// A job state change that the lifecycle does not allow
    #[error("Invalid job transition for '{job_id}': {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a parse error
    pub fn parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap an error raised by a pipeline step
    pub fn transform(step_index: usize, method_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::TransformFailure {
            step_index,
            method_id: method_id.into(),
            message: cause.to_string(),
        }
    }

    /// Whether the caller should retry later rather than fix the request
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Error::ResourceBusy(_) | Error::LockTimeout { .. } | Error::QueueFull(_)
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::BAD_REQUEST, "config_error", msg.clone()),
            Error::ResourceBusy(_) => (StatusCode::CONFLICT, "resource_busy", self.to_string()),
            Error::LockTimeout { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "lock_timeout", self.to_string())
            }
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            Error::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg.clone())
            }
            Error::Parse { .. } => (StatusCode::BAD_REQUEST, "parse_error", self.to_string()),
            Error::TransformFailure { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "transform_failure", self.to_string())
            }
            Error::Storage(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg.clone())
            }
            Error::QueueFull(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "queue_full", self.to_string())
            }
            Error::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "invalid_transition", self.to_string())
            }
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error", err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Csv(err) => (StatusCode::BAD_REQUEST, "csv_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_failure_names_step() {
        let err = Error::transform(2, "standardization", "column 'x' has zero range");
        let msg = err.to_string();
        assert!(msg.contains("Step 2"));
        assert!(msg.contains("standardization"));
        assert!(msg.contains("zero range"));
    }

    #[test]
    fn test_status_codes() {
        let busy = Error::ResourceBusy("a".into()).into_response();
        assert_eq!(busy.status(), StatusCode::CONFLICT);

        let missing = Error::not_found("job x").into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let invalid = Error::validation("unknown method").into_response();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_contention() {
        assert!(Error::QueueFull(3).is_contention());
        assert!(Error::LockTimeout {
            resource_id: "a".into(),
            timeout: Duration::from_secs(1)
        }
        .is_contention());
        assert!(!Error::validation("x").is_contention());
    }
}

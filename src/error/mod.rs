use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::queue::QueueError;
use crate::store::StoreError;

/// Coarse classification shared by the RPC and HTTP surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Referenced task does not exist
    NotFound,
    /// Rejected before any side effect
    Validation,
    /// Queue or database unreachable
    Transient,
    /// Some sibling branches succeeded, others failed
    Partial,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::Validation => "validation",
            ErrorClass::Transient => "transient",
            ErrorClass::Partial => "partial",
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No handler for requested types {requested:?}")]
    NoHandler { requested: Vec<String> },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Branches(#[from] BranchErrors),
}

impl From<StoreError> for NotifyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } if entity == "task" => NotifyError::TaskNotFound(id),
            other => NotifyError::Store(other),
        }
    }
}

impl NotifyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NotifyError::TaskNotFound(_) => ErrorClass::NotFound,
            NotifyError::Validation(_)
            | NotifyError::NoHandler { .. }
            | NotifyError::Serialization(_) => ErrorClass::Validation,
            NotifyError::Store(StoreError::NotFound { .. }) => ErrorClass::NotFound,
            NotifyError::Store(_) | NotifyError::Queue(_) => ErrorClass::Transient,
            NotifyError::Branches(branches) => branches.class(),
        }
    }
}

/// One failed branch of a concurrent fan-out.
#[derive(Debug)]
pub struct BranchFailure {
    pub branch: String,
    pub error: NotifyError,
}

/// Every failing branch of one fan-out, in launch order.
#[derive(Debug)]
pub struct BranchErrors {
    pub scope: &'static str,
    pub failures: Vec<BranchFailure>,
    pub succeeded: usize,
}

impl BranchErrors {
    /// Partial when any sibling got through, otherwise the first failure decides.
    pub fn class(&self) -> ErrorClass {
        if self.succeeded > 0 {
            return ErrorClass::Partial;
        }
        self.failures
            .first()
            .map(|f| f.error.class())
            .unwrap_or(ErrorClass::Transient)
    }

    pub fn failed_branches(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.branch.as_str()).collect()
    }
}

impl fmt::Display for BranchErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} branch(es) failed",
            self.scope,
            self.failures.len()
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { " [" } else { "; " };
            write!(f, "{}{}: {}", sep, failure.branch, failure.error)?;
        }
        if !self.failures.is_empty() {
            write!(f, "]")?;
        }
        Ok(())
    }
}

impl std::error::Error for BranchErrors {}

impl From<NotifyError> for tonic::Status {
    fn from(err: NotifyError) -> Self {
        let message = err.to_string();
        match err.class() {
            ErrorClass::NotFound => tonic::Status::not_found(message),
            ErrorClass::Validation => tonic::Status::invalid_argument(message),
            ErrorClass::Transient => tonic::Status::unavailable(message),
            ErrorClass::Partial => tonic::Status::aborted(message),
        }
    }
}

/// Errors surfaced by the ops HTTP handlers.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed request parameters, rejected before the service is called.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Notify(e) => {
                let log_msg = e.to_string();
                let (status, code) = match e.class() {
                    ErrorClass::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    ErrorClass::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    ErrorClass::Transient => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
                    ErrorClass::Partial => (StatusCode::INTERNAL_SERVER_ERROR, "PARTIAL_FAILURE"),
                };
                let client_msg = if is_production() && status.is_server_error() {
                    "Service temporarily unavailable".to_string()
                } else {
                    log_msg.clone()
                };
                (status, code, client_msg, log_msg)
            }
        };

        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

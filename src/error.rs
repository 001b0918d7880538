//! Error handling module
//!
//! Provides the unified error type for the operator registry engine. Every
//! error carries a stable machine-readable code, a human-readable message and
//! optional positional parameters; storage failures additionally carry the
//! sub-step of the transition that failed.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Coarse error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    InvalidStatus,
    ValidationFailed,
    Internal,
}

/// Sub-step of a lifecycle transition, used to annotate internal failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Lookup,
    MetadataWrite,
    RegistryWrite,
    ReleaseWrite,
    PolicyWrite,
    Commit,
    Resolve,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Lookup => "lookup",
            Step::MetadataWrite => "metadata write",
            Step::RegistryWrite => "registry write",
            Step::ReleaseWrite => "release write",
            Step::PolicyWrite => "policy write",
            Step::Commit => "commit",
            Step::Resolve => "resolve",
        };
        f.write_str(name)
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid status transition: {0}")]
    InvalidStatus(String),

    #[error("Validation error: {message}")]
    Validation {
        code: &'static str,
        message: String,
        params: Vec<String>,
    },

    #[error("{}", internal_message(.step, .message))]
    Internal { step: Option<Step>, message: String },
}

fn internal_message(step: &Option<Step>, message: &str) -> String {
    match step {
        Some(step) => format!("Internal error during {}: {}", step, message),
        None => format!("Internal error: {}", message),
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::InvalidStatus(_) => ErrorKind::InvalidStatus,
            AppError::Validation { .. } => ErrorKind::ValidationFailed,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Pool(_) => "POOL_EXHAUSTED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::InvalidStatus(_) => "INVALID_STATUS",
            AppError::Validation { code, .. } => *code,
            AppError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Positional parameters for message templating (empty unless validation)
    pub fn params(&self) -> &[String] {
        match self {
            AppError::Validation { params, .. } => params,
            _ => &[],
        }
    }

    /// Sub-step recorded on an internal failure
    pub fn step(&self) -> Option<Step> {
        match self {
            AppError::Internal { step, .. } => *step,
            _ => None,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal {
            step: None,
            message: msg.into(),
        }
    }

    /// Tag an internal failure with the sub-step it happened in.
    ///
    /// Non-internal kinds pass through untouched, and a step already recorded
    /// by an inner call is kept.
    pub fn at_step(self, step: Step) -> Self {
        match self {
            AppError::Database(e) => AppError::Internal {
                step: Some(step),
                message: e.to_string(),
            },
            AppError::Pool(e) => AppError::Internal {
                step: Some(step),
                message: e.to_string(),
            },
            AppError::Internal { step: None, message } => AppError::Internal {
                step: Some(step),
                message,
            },
            other => other,
        }
    }
}

/// Extension for annotating results with a transition sub-step
pub trait ResultExt<T> {
    fn at_step(self, step: Step) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn at_step(self, step: Step) -> Result<T, AppError> {
        self.map_err(|e| e.at_step(step))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.first() {
            Some((field, errs)) => {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("Invalid value for {}", field));
                AppError::Validation {
                    code: "INVALID_FIELD",
                    message,
                    params: vec![field.to_string()],
                }
            }
            None => validation_error("INVALID_REQUEST", "Invalid request"),
        }
    }
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let message = match err {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                "A database error occurred".to_string()
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                "Database connection pool exhausted".to_string()
            }
            AppError::Internal { .. } => {
                error!("{}", err);
                err.to_string()
            }
            AppError::Validation { message, .. } => message.clone(),
            AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Forbidden(msg)
            | AppError::InvalidStatus(msg) => msg.clone(),
        };

        Self {
            success: false,
            kind: err.kind(),
            code: err.code().to_string(),
            message,
            params: err.params().to_vec(),
        }
    }
}

/// Result type alias for engine operations
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(code: &'static str, msg: impl Into<String>) -> AppError {
    AppError::Validation {
        code,
        message: msg.into(),
        params: Vec::new(),
    }
}

/// Helper function to create a validation error with positional parameters
pub fn validation_error_with(
    code: &'static str,
    msg: impl Into<String>,
    params: Vec<String>,
) -> AppError {
    AppError::Validation {
        code,
        message: msg.into(),
        params,
    }
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

/// Helper function to create a conflict error
pub fn conflict_error(msg: impl Into<String>) -> AppError {
    AppError::Conflict(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_step_annotates_internal_only() {
        let err = AppError::internal("disk full").at_step(Step::ReleaseWrite);
        assert_eq!(err.step(), Some(Step::ReleaseWrite));
        assert_eq!(err.to_string(), "Internal error during release write: disk full");

        let err = not_found_error("operator x").at_step(Step::Lookup);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.step(), None);
    }

    #[test]
    fn test_inner_step_is_kept() {
        let err = AppError::internal("boom")
            .at_step(Step::MetadataWrite)
            .at_step(Step::Commit);
        assert_eq!(err.step(), Some(Step::MetadataWrite));
    }

    #[test]
    fn test_error_response_carries_code_and_params() {
        let err = validation_error_with(
            "NAME_TOO_LONG",
            "Operator name exceeds 50 characters",
            vec!["name".to_string(), "50".to_string()],
        );
        let response = ErrorResponse::from(&err);
        assert!(!response.success);
        assert_eq!(response.kind, ErrorKind::ValidationFailed);
        assert_eq!(response.code, "NAME_TOO_LONG");
        assert_eq!(response.params, vec!["name", "50"]);
    }
}

//! Unified error types for Compass

use std::time::Duration;
use thiserror::Error;

use crate::validation::ValidationErrors;

/// Unified error type for all Compass operations
#[derive(Error, Debug)]
pub enum CompassError {
    // Lookup errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    // Evaluation errors
    #[error("Query failed for metric {metric}: {message}")]
    Query { metric: String, message: String },

    #[error("Evaluation deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Evaluation cancelled")]
    Cancelled,

    // Write-path errors
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CompassError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn query(metric: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            metric: metric.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<ValidationErrors> for CompassError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

/// Result type alias using CompassError
pub type Result<T> = std::result::Result<T, CompassError>;

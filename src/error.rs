/// Unified error types for the casework moderation services
use thiserror::Error;

/// Main error type for case operations
#[derive(Error, Debug)]
pub enum CaseError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Aggregated validation failures, one entry per line
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Notification delivery errors; raised after commit, never rolls
    /// committed case data back
    #[error("Notification error: {0}")]
    Notification(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Single failure collected during the validation aggregation pass
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Component that produced the failure ("Case log", "Case", "Case note")
    pub component: &'static str,
    /// Field the failure refers to, empty when it covers the whole record
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(component: &'static str, path: &str, message: impl Into<String>) -> Self {
        Self {
            component,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.component, self.message)
        } else {
            write!(f, "{}-{}: {}", self.component, self.path, self.message)
        }
    }
}

/// Result type alias for case operations
pub type CaseResult<T> = Result<T, CaseError>;

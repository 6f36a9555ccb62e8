//! Error types for sitescout.

use thiserror::Error;

/// Result type alias using sitescout's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sitescout operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Empty or malformed input, rejected before any work is accepted
    #[error("Validation error: {0}")]
    Validation(String),

    /// Classifier reply was unparseable or the classifier call failed
    #[error("Classification error: {0}")]
    Classification(String),

    /// Directory or trace write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// External compute endpoint rejected or failed a request
    #[error("External system error{}: {message}", status_suffix(.status))]
    ExternalSystem {
        status: Option<u16>,
        message: String,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the resource's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unit of work exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|s| format!(" (status {})", s))
        .unwrap_or_default()
}

impl Error {
    /// Shorthand for an external-system error without an HTTP status.
    pub fn external(message: impl Into<String>) -> Self {
        Error::ExternalSystem {
            status: None,
            message: message.into(),
        }
    }

    /// Whether the error stems from bad caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::Timeout(e.to_string());
        }
        Error::Request(e.to_string())
    }
}

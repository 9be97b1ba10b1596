//! Error types for the status dispatcher.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures raised by external collaborators (mail, surveys, folders, NPS).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{collaborator} request failed: {reason}")]
    RequestFailed { collaborator: String, reason: String },

    #[error("{collaborator} rejected the request with status {status}")]
    Rejected { collaborator: String, status: u16 },

    #[error("{collaborator} is misconfigured: {reason}")]
    Misconfigured { collaborator: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Per-record handler failures. Caught at the dispatcher boundary.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Record {record_id} ({process}) timed out after {timeout:?}")]
    Timeout {
        record_id: String,
        process: String,
        timeout: Duration,
    },
}

impl HandlerError {
    /// Whether the next scheduled run may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Timeout { .. } => true,
            HandlerError::Collaborator(_) => true,
            HandlerError::Store(DatabaseError::NotFound { .. }) => false,
            HandlerError::Store(DatabaseError::Constraint(_)) => false,
            HandlerError::Store(_) => true,
        }
    }
}

/// Result type alias for the dispatcher.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable() {
        let err = HandlerError::Timeout {
            record_id: "r1".into(),
            process: "Running flow".into(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn missing_progress_is_not_retryable() {
        let err = HandlerError::from(DatabaseError::NotFound {
            entity: "progress_status".into(),
            id: "a@x.com".into(),
        });
        assert!(!err.is_retryable());
    }
}

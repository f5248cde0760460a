//! Domain error types
//!
//! Validation failures raised while constructing identifiers and stream
//! configurations.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid stream identifier
    #[error("Invalid stream ID: {0}")]
    InvalidStreamId(String),

    /// Invalid container identifier
    #[error("Invalid container ID: {0}")]
    InvalidContainerId(String),

    /// Invalid container-local entity identifier
    #[error("Invalid local ID: {0}")]
    InvalidLocalId(String),

    /// Invalid cursor token
    #[error("Invalid cursor token: {0}")]
    InvalidCursor(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidStreamId("".to_string());
        assert_eq!(err.to_string(), "Invalid stream ID: ");

        let err = DomainError::InvalidCursor("has space".to_string());
        assert_eq!(err.to_string(), "Invalid cursor token: has space");
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidLocalId("a b".to_string());
        let err2 = DomainError::InvalidLocalId("a b".to_string());
        let err3 = DomainError::InvalidLocalId("c d".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}

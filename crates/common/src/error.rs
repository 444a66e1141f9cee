//! Error types for MeshCDB

use thiserror::Error;

/// Result type alias using MeshCDB Error
pub type Result<T> = std::result::Result<T, Error>;

/// MeshCDB error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of resources: {0}")]
    OutOfResources(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidState { from: String, to: String },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Malformed record: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration database service stopped")]
    ServiceStopped,
}

impl Error {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(kind: &str, id: impl std::fmt::Display) -> Self {
        Error::AlreadyExists {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_state(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Error::InvalidState {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::not_found("node", "0x0001");
        assert_eq!(e.to_string(), "Resource not found: node with id 0x0001");

        let e = Error::invalid_state("phase1", "normal");
        assert_eq!(e.to_string(), "Invalid state transition: phase1 -> normal");
    }
}

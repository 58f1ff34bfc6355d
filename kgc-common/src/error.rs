//! Common error types for the consolidation engine

use thiserror::Error;

/// Common result type for kgc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across kgc crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of persisted columns or input documents
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (empty entity, malformed record)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Entity type identifier outside the fixed whitelist
    #[error("Unknown entity type '{given}' (valid: {})", valid.join(", "))]
    UnknownEntityType {
        given: String,
        valid: Vec<&'static str>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite lock contention errors that a caller may retry
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_contention_detection() {
        let locked = Error::Database(sqlx::Error::Protocol("database is locked".to_string()));
        assert!(locked.is_lock_contention());
        assert!(!Error::NotFound("x".to_string()).is_lock_contention());
    }
}

//! Common error types for rivalscan

use thiserror::Error;

/// Common result type for rivalscan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across rivalscan crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization of a stored column or payload failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying SQLite error is transient lock contention
    pub fn is_database_locked(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error_is_not_lock_error() {
        let err = Error::Internal("database is locked".to_string());
        assert!(!err.is_database_locked());
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::Config("scan.max_concurrent_competitors must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: scan.max_concurrent_competitors must be > 0"
        );
    }
}

//! Database error types.

use outbox_core::HeadersError;
use thiserror::Error;

/// Database error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Executor thread could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// The executor was shut down
    #[error("Database connection is closed")]
    Closed,

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored headers could not be decoded
    #[error("Invalid headers: {0}")]
    Headers(#[from] HeadersError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

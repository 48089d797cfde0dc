//! Configuration error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path error (e.g., home directory not found)
    #[error("Path error: {0}")]
    Path(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

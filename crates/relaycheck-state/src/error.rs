//! Error types for the probe-result cache.

use thiserror::Error;

/// Result type alias for cache operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open cache database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("failed to encode cache entry: {0}")]
    Serialize(String),

    #[error("corrupt cache entry: {0}")]
    Deserialize(String),
}

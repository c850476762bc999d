use thiserror::Error;

/// Errors raised by coordination and history backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached (poisoned connection, I/O failure).
    #[error("coordination store unreachable: {0}")]
    Unreachable(String),

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `increment` was called on a key holding a non-integer value.
    #[error("value at {key} is not an integer")]
    NotAnInteger { key: String },

    /// A compare-and-swap on `key` kept losing to concurrent writers.
    #[error("value at {key} changed concurrently {attempts} times")]
    Contended { key: String, attempts: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;

use thiserror::Error;
use uptime_core::CoreError;
use uptime_store::StoreError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The coordination store failed; callers fail closed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the registry.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A registry mutation was rejected before anything was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Timing configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout/deadline/TTL ordering does not hold.
    #[error("Invalid timing: {0}")]
    InvalidTiming(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

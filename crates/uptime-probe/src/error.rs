use thiserror::Error;

/// Failures that prevented a probe from producing a result.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Connection refused, DNS failure, TLS error and the like.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("probe timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The target descriptor itself is unusable (e.g. malformed URL).
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uptime_core::HealthResult;

use crate::error::Result;

/// Append-only per-service log of probe results.
///
/// Entries for one service are always read back in non-decreasing timestamp
/// order. A result whose timestamp is older than the newest entry already
/// stored for its service is clamped forward rather than inserted out of
/// order. Entries older than the store's retention horizon are evicted.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append `result` and return the entry as stored.
    async fn append(&self, result: &HealthResult) -> Result<HealthResult>;

    /// The newest `limit` entries for `service`, oldest first.
    async fn recent(&self, service: &str, limit: usize) -> Result<Vec<HealthResult>>;

    /// Drop every entry older than `cutoff`. Returns how many were removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

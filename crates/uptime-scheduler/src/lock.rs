use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uptime_store::{kv::get_json, CoordinationStore};

use crate::types::LockRecord;

/// Mutual exclusion over the coordination store.
///
/// A lock is a single key written with `set_if_absent` and a TTL, so a holder
/// that dies is replaced once the TTL lapses. Release is owner-checked: a
/// holder whose lock already expired and was re-acquired elsewhere cannot
/// delete the new holder's record.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Try to take `key` for `owner`. Never waits.
    ///
    /// A store failure reports the lock as not acquired.
    pub async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> bool {
        let record = LockRecord {
            holder_cycle_id: owner.to_string(),
            acquired_at: Utc::now(),
            ttl_ms: ttl.as_millis() as u64,
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%key, "lock record encode failed: {e}");
                return false;
            }
        };
        match self.store.set_if_absent(key, &raw, Some(ttl)).await {
            Ok(acquired) => {
                debug!(%key, %owner, acquired, "lock attempt");
                acquired
            }
            Err(e) => {
                warn!(%key, %owner, "lock store unreachable, treating as held: {e}");
                false
            }
        }
    }

    /// Release `key` if `owner` still holds it. A no-op otherwise.
    pub async fn release(&self, key: &str, owner: &str) {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(%key, %owner, "lock already gone at release");
                return;
            }
            Err(e) => {
                warn!(%key, %owner, "lock release read failed, leaving it to expire: {e}");
                return;
            }
        };
        let holder = serde_json::from_str::<LockRecord>(&raw)
            .map(|r| r.holder_cycle_id)
            .unwrap_or_default();
        if holder != owner {
            debug!(%key, %owner, %holder, "lock held by someone else, not releasing");
            return;
        }
        if let Err(e) = self.store.delete_if_equals(key, &raw).await {
            warn!(%key, %owner, "lock release failed, leaving it to expire: {e}");
        }
    }

    /// Current holder record, if any.
    pub async fn holder(&self, key: &str) -> uptime_store::Result<Option<LockRecord>> {
        get_json(self.store.as_ref(), key).await
    }
}

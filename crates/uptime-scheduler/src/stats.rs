use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uptime_store::CoordinationStore;

use crate::keys;
use crate::types::Cycle;

/// Best-effort counters for status readers. Failures are logged and ignored;
/// nothing here feeds back into scheduling decisions.
#[derive(Clone)]
pub struct SchedulerStats {
    store: Arc<dyn CoordinationStore>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub active_cycles: i64,
    pub last_ping_timestamp: Option<DateTime<Utc>>,
    pub last_cycle_id: Option<String>,
    pub last_cycle_time: Option<DateTime<Utc>>,
}

impl SchedulerStats {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub async fn record_ping(&self) {
        let now = Utc::now().to_rfc3339();
        if let Err(e) = self.store.set(keys::STATS_LAST_PING, &now, None).await {
            debug!("stats: last ping not recorded: {e}");
        }
    }

    pub async fn cycle_started(&self, cycle: &Cycle) {
        if let Err(e) = self.store.increment(keys::STATS_ACTIVE_CYCLES, 1).await {
            debug!("stats: active cycles not incremented: {e}");
        }
        if let Err(e) = self
            .store
            .set(keys::STATS_LAST_CYCLE_ID, &cycle.cycle_id, None)
            .await
        {
            debug!("stats: last cycle id not recorded: {e}");
        }
        let started = cycle.started_at.to_rfc3339();
        if let Err(e) = self
            .store
            .set(keys::STATS_LAST_CYCLE_TIME, &started, None)
            .await
        {
            debug!("stats: last cycle time not recorded: {e}");
        }
    }

    pub async fn cycle_finished(&self) {
        if let Err(e) = self.store.increment(keys::STATS_ACTIVE_CYCLES, -1).await {
            debug!("stats: active cycles not decremented: {e}");
        }
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_cycles: self
                .read(keys::STATS_ACTIVE_CYCLES)
                .await
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            last_ping_timestamp: self.read_time(keys::STATS_LAST_PING).await,
            last_cycle_id: self.read(keys::STATS_LAST_CYCLE_ID).await,
            last_cycle_time: self.read_time(keys::STATS_LAST_CYCLE_TIME).await,
        }
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(v) => v,
            Err(e) => {
                debug!(%key, "stats read failed: {e}");
                None
            }
        }
    }

    async fn read_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.read(key)
            .await
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

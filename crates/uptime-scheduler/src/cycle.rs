use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uptime_store::{
    kv::{get_json, set_json},
    CoordinationStore,
};

use crate::keys;
use crate::types::{CancellationMarker, Cycle, CycleStatus};

/// Cycle records and the cancellation epoch.
///
/// The epoch counter at [`keys::CANCEL_EPOCH`] only ever grows. A cycle is
/// superseded once the counter has moved past the epoch of the chain it
/// continues; the timestamp marker is informational only.
#[derive(Clone)]
pub struct CycleStateStore {
    store: Arc<dyn CoordinationStore>,
}

impl CycleStateStore {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub async fn current_epoch(&self) -> uptime_store::Result<u64> {
        let raw = self.store.get(keys::CANCEL_EPOCH).await?;
        Ok(raw
            .and_then(|v| v.parse::<i64>().ok())
            .map(|v| v.max(0) as u64)
            .unwrap_or(0))
    }

    /// Record a new running cycle.
    ///
    /// `chain_epoch` is the epoch the arming trigger carried. `None` starts a
    /// fresh chain at the current epoch. A carried epoch above the current one
    /// is clamped to it, so a chain never outruns the cancellation counter.
    pub async fn begin_cycle(
        &self,
        cycle_id: &str,
        chain_epoch: Option<u64>,
    ) -> uptime_store::Result<Cycle> {
        let epoch = self.current_epoch().await?;
        let cycle = Cycle {
            cycle_id: cycle_id.to_string(),
            started_at: Utc::now(),
            epoch,
            chain_epoch: chain_epoch.map_or(epoch, |c| c.min(epoch)),
            status: CycleStatus::Running,
        };
        set_json(
            self.store.as_ref(),
            &keys::cycle(cycle_id),
            &cycle,
            Some(keys::CYCLE_RECORD_TTL),
        )
        .await?;
        set_json(self.store.as_ref(), keys::CYCLE_CURRENT, &cycle, None).await?;
        debug!(%cycle_id, epoch, chain_epoch = cycle.chain_epoch, "cycle begun");
        Ok(cycle)
    }

    /// Store the final status of `cycle`.
    pub async fn record_outcome(&self, cycle: &Cycle) -> uptime_store::Result<()> {
        set_json(
            self.store.as_ref(),
            &keys::cycle(&cycle.cycle_id),
            cycle,
            Some(keys::CYCLE_RECORD_TTL),
        )
        .await?;
        // Only overwrite the pointer if no newer cycle has taken it.
        let current: Option<Cycle> = get_json(self.store.as_ref(), keys::CYCLE_CURRENT).await?;
        if current.is_some_and(|c| c.cycle_id == cycle.cycle_id) {
            set_json(self.store.as_ref(), keys::CYCLE_CURRENT, cycle, None).await?;
        }
        Ok(())
    }

    /// Whether a cancellation happened after `cycle`'s chain was armed.
    pub async fn is_superseded(&self, cycle: &Cycle) -> uptime_store::Result<bool> {
        Ok(self.current_epoch().await? > cycle.chain_epoch)
    }

    /// Supersede every running and armed cycle.
    pub async fn cancel_all(&self) -> uptime_store::Result<CancellationMarker> {
        let epoch = self.store.increment(keys::CANCEL_EPOCH, 1).await?;
        let marker = CancellationMarker {
            timestamp: Utc::now(),
            epoch: epoch.max(0) as u64,
        };
        set_json(self.store.as_ref(), keys::CANCEL_MARKER, &marker, None).await?;
        info!(epoch = marker.epoch, "all cycles cancelled");
        Ok(marker)
    }

    pub async fn current(&self) -> uptime_store::Result<Option<Cycle>> {
        get_json(self.store.as_ref(), keys::CYCLE_CURRENT).await
    }

    pub async fn get(&self, cycle_id: &str) -> uptime_store::Result<Option<Cycle>> {
        get_json(self.store.as_ref(), &keys::cycle(cycle_id)).await
    }

    pub async fn marker(&self) -> uptime_store::Result<Option<CancellationMarker>> {
        get_json(self.store.as_ref(), keys::CANCEL_MARKER).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_store::MemoryStore;

    fn cycles() -> CycleStateStore {
        CycleStateStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn fresh_cycle_inherits_current_epoch() {
        let cycles = cycles();
        cycles.cancel_all().await.unwrap();
        let c = cycles.begin_cycle("c1", None).await.unwrap();
        assert_eq!(c.epoch, 1);
        assert_eq!(c.chain_epoch, 1);
        assert!(!cycles.is_superseded(&c).await.unwrap());
        assert_eq!(cycles.current().await.unwrap().unwrap().cycle_id, "c1");
    }

    #[tokio::test]
    async fn cancel_supersedes_running_cycle() {
        let cycles = cycles();
        let c = cycles.begin_cycle("c1", None).await.unwrap();
        let marker = cycles.cancel_all().await.unwrap();
        assert_eq!(marker.epoch, 1);
        assert!(cycles.is_superseded(&c).await.unwrap());
        assert_eq!(cycles.marker().await.unwrap().unwrap().epoch, 1);
    }

    #[tokio::test]
    async fn future_chain_epoch_is_clamped_to_counter() {
        let cycles = cycles();
        let c = cycles.begin_cycle("c1", Some(5)).await.unwrap();
        assert_eq!(c.epoch, 0);
        assert_eq!(c.chain_epoch, 0);
        cycles.cancel_all().await.unwrap();
        assert!(cycles.is_superseded(&c).await.unwrap());
    }

    #[tokio::test]
    async fn continuation_armed_before_cancel_is_superseded() {
        let cycles = cycles();
        cycles.cancel_all().await.unwrap();
        // Armed at epoch 0, started after the cancel moved the counter to 1.
        let c = cycles.begin_cycle("c2", Some(0)).await.unwrap();
        assert_eq!(c.epoch, 1);
        assert!(cycles.is_superseded(&c).await.unwrap());
    }

    #[tokio::test]
    async fn outcome_does_not_clobber_newer_current() {
        let cycles = cycles();
        let mut first = cycles.begin_cycle("c1", None).await.unwrap();
        cycles.begin_cycle("c2", None).await.unwrap();
        first.status = CycleStatus::Completed;
        cycles.record_outcome(&first).await.unwrap();
        assert_eq!(cycles.current().await.unwrap().unwrap().cycle_id, "c2");
        assert_eq!(
            cycles.get("c1").await.unwrap().unwrap().status,
            CycleStatus::Completed
        );
    }
}

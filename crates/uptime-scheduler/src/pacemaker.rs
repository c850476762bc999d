use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::{CycleOutcome, Invocation, SchedulerEngine};
use crate::trigger::StoreTrigger;

/// The always-on caller behind the store trigger.
///
/// Ticks on a short fixed interval and is a no-op unless the armed instant has
/// elapsed. It never starts a chain on its own: with nothing armed it stays
/// idle until a fresh `/ping` arrives.
#[derive(Clone)]
pub struct Pacemaker {
    engine: Arc<SchedulerEngine>,
    trigger: Arc<StoreTrigger>,
    interval: Duration,
}

impl Pacemaker {
    pub fn new(engine: Arc<SchedulerEngine>, trigger: Arc<StoreTrigger>, interval: Duration) -> Self {
        Self {
            engine,
            trigger,
            interval,
        }
    }

    /// Main loop. Beats every `interval` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "pacemaker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.beat().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("pacemaker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fire the armed continuation if it is due. Returns what the engine did,
    /// or `None` when nothing was due.
    pub async fn beat(&self) -> Option<CycleOutcome> {
        let due = match self.trigger.due(Utc::now()).await {
            Ok(due) => due?,
            Err(e) => {
                warn!("pacemaker could not read trigger: {e}");
                return None;
            }
        };
        debug!(epoch = due.epoch, not_before = %due.not_before, "armed trigger due");
        match self
            .engine
            .trigger(Invocation::Continuation { epoch: due.epoch })
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("continuation failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uptime_core::{config::SchedulerConfig, HealthResult, ServiceTarget};
    use uptime_probe::{HealthCheck, ProbeError};
    use uptime_store::{MemoryHistory, MemoryStore};

    use crate::trigger::SelfTrigger;

    struct AlwaysUp;

    #[async_trait]
    impl HealthCheck for AlwaysUp {
        fn name(&self) -> &str {
            "always-up"
        }

        async fn check(&self, target: &ServiceTarget) -> Result<HealthResult, ProbeError> {
            Ok(HealthResult::up(&target.name, 1, Some(200)))
        }
    }

    fn pacemaker() -> (Pacemaker, Arc<StoreTrigger>, Arc<SchedulerEngine>) {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(StoreTrigger::new(store.clone()));
        let engine = Arc::new(
            SchedulerEngine::new(
                store,
                Arc::new(MemoryHistory::new(chrono::Duration::days(1))),
                Arc::new(AlwaysUp),
                trigger.clone(),
                SchedulerConfig::default(),
            )
            .unwrap(),
        );
        let pm = Pacemaker::new(engine.clone(), trigger.clone(), Duration::from_millis(10));
        (pm, trigger, engine)
    }

    #[tokio::test]
    async fn idle_without_armed_trigger() {
        let (pm, _, _) = pacemaker();
        assert!(pm.beat().await.is_none());
    }

    #[tokio::test]
    async fn not_yet_due_is_a_no_op() {
        let (pm, trigger, _) = pacemaker();
        trigger
            .arm(Utc::now() + chrono::Duration::seconds(60), 0)
            .await
            .unwrap();
        assert!(pm.beat().await.is_none());
    }

    #[tokio::test]
    async fn due_trigger_runs_continuation_and_rearms() {
        let (pm, trigger, engine) = pacemaker();
        let past = Utc::now() - chrono::Duration::seconds(1);
        trigger.arm(past, 0).await.unwrap();
        let outcome = pm.beat().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed { .. }));
        let armed = trigger.armed().await.unwrap().unwrap();
        assert!(armed.not_before > Utc::now());
        assert!(engine.status().await.unwrap().next_trigger_at.is_some());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (pm, _, _) = pacemaker();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(pm.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

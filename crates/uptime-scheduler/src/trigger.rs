//! Self-triggers: how a finished cycle schedules the next one.
//!
//! Two strategies share the [`SelfTrigger`] contract:
//!
//! * [`StoreTrigger`] persists the armed instant in the coordination store.
//!   An always-on caller (the pacemaker, or any external poller hitting
//!   `/ping/poll`) invokes the orchestrator once it is due.
//! * [`DeferredCallTrigger`] keeps one in-process timer that POSTs the
//!   orchestrator's own `/ping` endpoint when it fires.
//!
//! Both hold at most one armed invocation, so rearming is idempotent.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uptime_store::{kv::get_json, CoordinationStore, StoreError};

use crate::keys;
use crate::types::ArmedTrigger;

#[async_trait]
pub trait SelfTrigger: Send + Sync {
    /// Arm the next invocation for `not_before`, continuing the chain at
    /// `epoch`. Replaces any invocation already armed.
    async fn arm(&self, not_before: DateTime<Utc>, epoch: u64) -> uptime_store::Result<()>;

    /// Drop the armed invocation if its epoch is older than `current_epoch`.
    /// Returns whether something was dropped.
    async fn disarm_stale(&self, current_epoch: u64) -> uptime_store::Result<bool>;

    /// The invocation currently armed, if any.
    async fn armed(&self) -> uptime_store::Result<Option<ArmedTrigger>>;
}

/// Compare-and-swap rounds before `StoreTrigger::arm` gives up.
const ARM_ATTEMPTS: usize = 8;

/// Armed instant persisted under [`keys::TRIGGER_NOT_BEFORE`].
pub struct StoreTrigger {
    store: Arc<dyn CoordinationStore>,
}

impl StoreTrigger {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// The armed invocation if it is due at `now`.
    pub async fn due(&self, now: DateTime<Utc>) -> uptime_store::Result<Option<ArmedTrigger>> {
        Ok(self.armed().await?.filter(|t| t.not_before <= now))
    }
}

#[async_trait]
impl SelfTrigger for StoreTrigger {
    async fn arm(&self, not_before: DateTime<Utc>, epoch: u64) -> uptime_store::Result<()> {
        let raw = serde_json::to_string(&ArmedTrigger { not_before, epoch })?;
        for _ in 0..ARM_ATTEMPTS {
            if let Some(current) = self.store.get(keys::TRIGGER_NOT_BEFORE).await? {
                // A chain started after a cancel must not be replaced by one
                // from before it.
                if let Ok(existing) = serde_json::from_str::<ArmedTrigger>(&current) {
                    if existing.epoch > epoch {
                        debug!(existing = existing.epoch, epoch, "newer chain armed, not rearming");
                        return Ok(());
                    }
                }
                if !self
                    .store
                    .delete_if_equals(keys::TRIGGER_NOT_BEFORE, &current)
                    .await?
                {
                    continue;
                }
            }
            if self
                .store
                .set_if_absent(keys::TRIGGER_NOT_BEFORE, &raw, None)
                .await?
            {
                debug!(%not_before, epoch, "store trigger armed");
                return Ok(());
            }
        }
        Err(StoreError::Contended {
            key: keys::TRIGGER_NOT_BEFORE.to_string(),
            attempts: ARM_ATTEMPTS,
        })
    }

    async fn disarm_stale(&self, current_epoch: u64) -> uptime_store::Result<bool> {
        let Some(raw) = self.store.get(keys::TRIGGER_NOT_BEFORE).await? else {
            return Ok(false);
        };
        let stale = serde_json::from_str::<ArmedTrigger>(&raw)
            .map(|t| t.epoch < current_epoch)
            .unwrap_or(true);
        if !stale {
            return Ok(false);
        }
        let removed = self
            .store
            .delete_if_equals(keys::TRIGGER_NOT_BEFORE, &raw)
            .await?;
        if removed {
            info!(current_epoch, "stale store trigger disarmed");
        }
        Ok(removed)
    }

    async fn armed(&self) -> uptime_store::Result<Option<ArmedTrigger>> {
        get_json(self.store.as_ref(), keys::TRIGGER_NOT_BEFORE).await
    }
}

struct Pending {
    armed: ArmedTrigger,
    timer: JoinHandle<()>,
}

/// One deferred outbound call to `url?epoch=N`.
///
/// The timer task hands the actual request to a detached task once it fires,
/// so rearming from inside the cycle that call started never aborts it.
pub struct DeferredCallTrigger {
    client: reqwest::Client,
    url: String,
    pending: Mutex<Option<Pending>>,
}

impl DeferredCallTrigger {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            pending: Mutex::new(None),
        }
    }

    fn spawn_timer(&self, armed: ArmedTrigger) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let wait = (armed.not_before - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            tokio::spawn(async move {
                let epoch = armed.epoch;
                match client.post(&url).query(&[("epoch", epoch)]).send().await {
                    Ok(resp) => debug!(%url, epoch, status = %resp.status(), "deferred call delivered"),
                    Err(e) => warn!(%url, epoch, "deferred call failed: {e}"),
                }
            });
        })
    }
}

#[async_trait]
impl SelfTrigger for DeferredCallTrigger {
    async fn arm(&self, not_before: DateTime<Utc>, epoch: u64) -> uptime_store::Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = pending.as_ref() {
            if !p.timer.is_finished() {
                if p.armed.epoch > epoch {
                    return Ok(());
                }
                if p.armed.epoch == epoch && p.armed.not_before <= not_before {
                    debug!(epoch, "deferred call already armed earlier, keeping it");
                    return Ok(());
                }
            }
        }
        if let Some(old) = pending.take() {
            old.timer.abort();
        }
        let armed = ArmedTrigger { not_before, epoch };
        let timer = self.spawn_timer(armed.clone());
        debug!(%not_before, epoch, "deferred call armed");
        *pending = Some(Pending { armed, timer });
        Ok(())
    }

    async fn disarm_stale(&self, current_epoch: u64) -> uptime_store::Result<bool> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let stale = pending
            .as_ref()
            .is_some_and(|p| p.armed.epoch < current_epoch && !p.timer.is_finished());
        if stale {
            if let Some(p) = pending.take() {
                p.timer.abort();
                info!(current_epoch, "stale deferred call disarmed");
            }
        }
        Ok(stale)
    }

    async fn armed(&self) -> uptime_store::Result<Option<ArmedTrigger>> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        Ok(pending
            .as_ref()
            .filter(|p| !p.timer.is_finished())
            .map(|p| p.armed.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::{extract::State, routing::post, Router};
    use uptime_store::MemoryStore;

    #[tokio::test]
    async fn store_trigger_keeps_a_single_armed_instant() {
        let trigger = StoreTrigger::new(Arc::new(MemoryStore::new()));
        let t1 = Utc::now() + chrono::Duration::seconds(30);
        let t2 = Utc::now() + chrono::Duration::seconds(60);
        trigger.arm(t1, 0).await.unwrap();
        trigger.arm(t2, 0).await.unwrap();
        let armed = trigger.armed().await.unwrap().unwrap();
        assert_eq!(armed.not_before, t2);
        assert!(trigger.due(Utc::now()).await.unwrap().is_none());
        assert!(trigger.due(t2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_trigger_disarms_only_stale_epochs() {
        let trigger = StoreTrigger::new(Arc::new(MemoryStore::new()));
        trigger.arm(Utc::now(), 2).await.unwrap();
        assert!(!trigger.disarm_stale(2).await.unwrap());
        assert!(trigger.armed().await.unwrap().is_some());
        assert!(trigger.disarm_stale(3).await.unwrap());
        assert!(trigger.armed().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_trigger_ignores_older_chain() {
        let trigger = StoreTrigger::new(Arc::new(MemoryStore::new()));
        let fresh = Utc::now() + chrono::Duration::seconds(10);
        trigger.arm(fresh, 1).await.unwrap();
        trigger.arm(Utc::now(), 0).await.unwrap();
        assert_eq!(trigger.armed().await.unwrap().unwrap().epoch, 1);
    }

    #[tokio::test]
    async fn concurrent_arms_keep_the_newest_chain() {
        let trigger = Arc::new(StoreTrigger::new(Arc::new(MemoryStore::new())));
        trigger.arm(Utc::now(), 0).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..32u64 {
            let trigger = trigger.clone();
            tasks.push(tokio::spawn(async move {
                let at = Utc::now() + chrono::Duration::seconds(i as i64);
                trigger.arm(at, i % 2).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(trigger.armed().await.unwrap().unwrap().epoch, 1);
    }

    async fn counting_server() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/ping",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }),
            )
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/ping"), hits)
    }

    #[tokio::test]
    async fn deferred_rearm_is_idempotent() {
        let (url, hits) = counting_server().await;
        let trigger = DeferredCallTrigger::new(reqwest::Client::new(), url);
        let at = Utc::now() + chrono::Duration::milliseconds(100);
        trigger.arm(at, 0).await.unwrap();
        trigger.arm(at, 0).await.unwrap();
        trigger
            .arm(at + chrono::Duration::milliseconds(50), 0)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deferred_stale_call_is_dropped() {
        let (url, hits) = counting_server().await;
        let trigger = DeferredCallTrigger::new(reqwest::Client::new(), url);
        trigger
            .arm(Utc::now() + chrono::Duration::milliseconds(100), 0)
            .await
            .unwrap();
        assert!(trigger.disarm_stale(1).await.unwrap());
        assert!(trigger.armed().await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}

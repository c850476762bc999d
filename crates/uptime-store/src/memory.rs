use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use tracing::debug;
use uptime_core::HealthResult;

use crate::error::{Result, StoreError};
use crate::history::HistoryStore;
use crate::kv::CoordinationStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process coordination store.
///
/// Each operation touches a single DashMap shard under its write lock, which
/// gives the same per-key atomicity the SQLite backend gets from single
/// statements.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        // Clone out before any removal so the shard read lock is released.
        let found = self.entries.get(key).map(|e| e.clone());
        match found {
            Some(e) if e.is_live(now) => Ok(Some(e.value)),
            Some(_) => {
                self.entries.remove_if(key, |_, e| !e.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut o) => {
                if o.get().is_live(now) {
                    return Ok(false);
                }
                o.insert(Entry::new(value, ttl));
                Ok(true)
            }
            MapEntry::Vacant(v) => {
                v.insert(Entry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, e)| e.is_live(now)))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, e| e.is_live(now) && e.value == expected)
            .is_some())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut o) => {
                let current = if o.get().is_live(now) {
                    o.get()
                        .value
                        .parse::<i64>()
                        .map_err(|_| StoreError::NotAnInteger {
                            key: key.to_string(),
                        })?
                } else {
                    0
                };
                let next = current + delta;
                o.insert(Entry::new(&next.to_string(), None));
                Ok(next)
            }
            MapEntry::Vacant(v) => {
                v.insert(Entry::new(&delta.to_string(), None));
                Ok(delta)
            }
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let now = Instant::now();
        let mut out: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

/// In-process history log, one vector per service.
pub struct MemoryHistory {
    entries: DashMap<String, Vec<HealthResult>>,
    retention: chrono::Duration,
}

impl MemoryHistory {
    pub fn new(retention: chrono::Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, result: &HealthResult) -> Result<HealthResult> {
        let mut stored = result.clone();
        let horizon = Utc::now() - self.retention;
        let mut log = self
            .entries
            .entry(result.service_name.clone())
            .or_default();
        if let Some(last) = log.last() {
            if stored.timestamp < last.timestamp {
                debug!(
                    service = %stored.service_name,
                    "history timestamp behind newest entry; clamping"
                );
                stored.timestamp = last.timestamp;
            }
        }
        log.retain(|r| r.timestamp >= horizon);
        log.push(stored.clone());
        Ok(stored)
    }

    async fn recent(&self, service: &str, limit: usize) -> Result<Vec<HealthResult>> {
        Ok(self
            .entries
            .get(service)
            .map(|log| {
                let skip = log.len().saturating_sub(limit);
                log[skip..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for mut log in self.entries.iter_mut() {
            let before = log.len();
            log.retain(|r| r.timestamp >= cutoff);
            removed += before - log.len();
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_core::HealthStatus;

    #[tokio::test]
    async fn set_if_absent_only_first_wins() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock", "a", None).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", None).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn expired_entry_counts_as_absent() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store
            .set_if_absent("k", "w", Some(Duration::from_secs(5)))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_if_equals_respects_owner() {
        let store = MemoryStore::new();
        store.set("lock", "owner-1", None).await.unwrap();
        assert!(!store.delete_if_equals("lock", "owner-2").await.unwrap());
        assert!(store.delete_if_equals("lock", "owner-1").await.unwrap());
        assert!(!store.delete_if_equals("lock", "owner-1").await.unwrap());
    }

    #[tokio::test]
    async fn increment_starts_from_zero_and_rejects_text() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("n", 1).await.unwrap(), 1);
        assert_eq!(store.increment("n", 4).await.unwrap(), 5);
        assert_eq!(store.increment("n", -2).await.unwrap(), 3);
        store.set("s", "abc", None).await.unwrap();
        assert!(matches!(
            store.increment("s", 1).await,
            Err(StoreError::NotAnInteger { .. })
        ));
    }

    #[tokio::test]
    async fn list_prefix_is_sorted_and_filtered() {
        let store = MemoryStore::new();
        store.set("job:b", "2", None).await.unwrap();
        store.set("job:a", "1", None).await.unwrap();
        store.set("other", "x", None).await.unwrap();
        let listed = store.list_prefix("job:").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ("job:a".to_string(), "1".to_string()),
                ("job:b".to_string(), "2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn history_clamps_out_of_order_timestamps() {
        let history = MemoryHistory::new(chrono::Duration::days(30));
        let first = HealthResult::up("api", 10, Some(200));
        let mut older = HealthResult::down("api", "timeout");
        older.timestamp = first.timestamp - chrono::Duration::seconds(5);

        history.append(&first).await.unwrap();
        let stored = history.append(&older).await.unwrap();
        assert_eq!(stored.timestamp, first.timestamp);

        let recent = history.recent("api", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn history_recent_returns_newest_tail() {
        let history = MemoryHistory::new(chrono::Duration::days(30));
        for i in 0..5 {
            history
                .append(&HealthResult::up("api", i, Some(200)))
                .await
                .unwrap();
        }
        let recent = history.recent("api", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].response_time_ms, Some(3));
        assert_eq!(recent[1].response_time_ms, Some(4));
        assert!(history.recent("missing", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_append_evicts_past_retention() {
        let history = MemoryHistory::new(chrono::Duration::days(1));
        let mut ancient = HealthResult::up("api", 1, None);
        ancient.timestamp = Utc::now() - chrono::Duration::days(3);
        history.append(&ancient).await.unwrap();
        history
            .append(&HealthResult::up("api", 2, None))
            .await
            .unwrap();
        let recent = history.recent("api", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].response_time_ms, Some(2));
    }
}

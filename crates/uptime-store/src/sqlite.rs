use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};
use uptime_core::{HealthResult, HealthStatus};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::history::HistoryStore;
use crate::kv::CoordinationStore;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|t| now_ms() + t.as_millis() as i64)
}

fn lock_conn(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    db.lock()
        .map_err(|_| StoreError::Unreachable("sqlite connection mutex poisoned".to_string()))
}

/// Coordination store backed by the `kv` table.
///
/// Each trait method is one SQL statement, so atomicity holds across every
/// process sharing the database file, not just within this one.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Delete rows whose expiry has passed. Reads already ignore them.
    pub fn purge_expired(&self) -> Result<usize> {
        let db = lock_conn(&self.db)?;
        let n = db.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [now_ms()],
        )?;
        if n > 0 {
            debug!(count = n, "swept expired kv rows");
        }
        Ok(n)
    }
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = lock_conn(&self.db)?;
        let value = db
            .query_row(
                "SELECT value FROM kv
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                rusqlite::params![key, now_ms()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let db = lock_conn(&self.db)?;
        db.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, expires_at = excluded.expires_at",
            rusqlite::params![key, value, expiry_ms(ttl)],
        )?;
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let db = lock_conn(&self.db)?;
        // The upsert only overwrites an expired row; a live row leaves the
        // statement with zero changes.
        let n = db.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, expires_at = excluded.expires_at
             WHERE kv.expires_at IS NOT NULL AND kv.expires_at <= ?4",
            rusqlite::params![key, value, expiry_ms(ttl), now_ms()],
        )?;
        Ok(n == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let db = lock_conn(&self.db)?;
        let n = db.execute(
            "DELETE FROM kv
             WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            rusqlite::params![key, now_ms()],
        )?;
        Ok(n > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let db = lock_conn(&self.db)?;
        let n = db.execute(
            "DELETE FROM kv
             WHERE key = ?1 AND value = ?2
               AND (expires_at IS NULL OR expires_at > ?3)",
            rusqlite::params![key, expected, now_ms()],
        )?;
        Ok(n > 0)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let db = lock_conn(&self.db)?;
        let current: Option<String> = db
            .query_row(
                "SELECT value FROM kv
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                rusqlite::params![key, now_ms()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(ref v) = current {
            if v.parse::<i64>().is_err() {
                return Err(StoreError::NotAnInteger {
                    key: key.to_string(),
                });
            }
        }
        // The arithmetic itself is a single upsert, so concurrent increments
        // from other connections cannot be lost.
        let raw: String = db.query_row(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, CAST(?2 AS TEXT), NULL)
             ON CONFLICT(key) DO UPDATE
             SET value = CAST(
                     (CASE WHEN kv.expires_at IS NOT NULL AND kv.expires_at <= ?3
                           THEN 0 ELSE CAST(kv.value AS INTEGER) END) + ?2
                 AS TEXT),
                 expires_at = NULL
             RETURNING value",
            rusqlite::params![key, delta, now_ms()],
            |row| row.get(0),
        )?;
        raw.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
            key: key.to_string(),
        })
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.purge_expired()?;
        let db = lock_conn(&self.db)?;
        let mut stmt = db.prepare_cached(
            "SELECT key, value FROM kv
             WHERE substr(key, 1, length(?1)) = ?1
               AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY key",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![prefix, now_ms()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// History log backed by the `health_history` table.
pub struct SqliteHistory {
    db: Mutex<Connection>,
    retention: chrono::Duration,
}

impl SqliteHistory {
    pub fn new(conn: Connection, retention: chrono::Duration) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            retention,
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    #[instrument(skip(self, result), fields(service = %result.service_name))]
    async fn append(&self, result: &HealthResult) -> Result<HealthResult> {
        let db = lock_conn(&self.db)?;
        let newest: Option<i64> = db.query_row(
            "SELECT MAX(timestamp_ms) FROM health_history WHERE service = ?1",
            [&result.service_name],
            |row| row.get(0),
        )?;

        let mut stored = result.clone();
        let mut ts = result.timestamp.timestamp_millis();
        if let Some(newest) = newest {
            if ts < newest {
                debug!("history timestamp behind newest entry; clamping");
                ts = newest;
                stored.timestamp = from_millis(newest);
            }
        }

        db.execute(
            "INSERT INTO health_history
             (service, status, timestamp_ms, response_time_ms, status_code,
              error, cycle_id, job_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                stored.service_name,
                stored.status.to_string(),
                ts,
                stored.response_time_ms.map(|v| v as i64),
                stored.status_code,
                stored.error,
                stored.cycle_id,
                stored.job_id,
            ],
        )?;

        let horizon = (Utc::now() - self.retention).timestamp_millis();
        db.execute(
            "DELETE FROM health_history WHERE service = ?1 AND timestamp_ms < ?2",
            rusqlite::params![stored.service_name, horizon],
        )?;
        Ok(stored)
    }

    async fn recent(&self, service: &str, limit: usize) -> Result<Vec<HealthResult>> {
        let db = lock_conn(&self.db)?;
        let mut stmt = db.prepare_cached(
            "SELECT service, status, timestamp_ms, response_time_ms, status_code,
                    error, cycle_id, job_id
             FROM health_history
             WHERE service = ?1
             ORDER BY timestamp_ms DESC, id DESC
             LIMIT ?2",
        )?;
        let mut rows = stmt
            .query_map(rusqlite::params![service, limit as i64], row_to_result)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = lock_conn(&self.db)?;
        let n = db.execute(
            "DELETE FROM health_history WHERE timestamp_ms < ?1",
            [cutoff.timestamp_millis()],
        )?;
        Ok(n)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Map a SQLite row to a `HealthResult`.
fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<HealthResult> {
    let status_str: String = row.get(1)?;
    Ok(HealthResult {
        service_name: row.get(0)?,
        // Unknown strings only appear if the table was edited by hand.
        status: status_str.parse().unwrap_or(HealthStatus::Unknown),
        timestamp: from_millis(row.get(2)?),
        response_time_ms: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
        status_code: row.get(4)?,
        error: row.get(5)?,
        cycle_id: row.get(6)?,
        job_id: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive_until_expiry() {
        let store = store();
        let ttl = Some(Duration::from_millis(50));
        assert!(store.set_if_absent("lock", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.set_if_absent("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn delete_if_equals_ignores_other_owner() {
        let store = store();
        store.set("lock", "me", None).await.unwrap();
        assert!(!store.delete_if_equals("lock", "you").await.unwrap());
        assert!(store.delete_if_equals("lock", "me").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_upserts_counter() {
        let store = store();
        assert_eq!(store.increment("epoch", 1).await.unwrap(), 1);
        assert_eq!(store.increment("epoch", 1).await.unwrap(), 2);
        assert_eq!(store.get("epoch").await.unwrap().as_deref(), Some("2"));
        store.set("name", "not a number", None).await.unwrap();
        assert!(store.increment("name", 1).await.is_err());
    }

    #[tokio::test]
    async fn increment_resets_expired_value() {
        let store = store();
        store
            .set("n", "41", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.increment("n", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_prefix_skips_expired_rows() {
        let store = store();
        store.set("job:1", "a", None).await.unwrap();
        store
            .set("job:2", "b", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.set("jobs", "c", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let listed = store.list_prefix("job:").await.unwrap();
        assert_eq!(listed, vec![("job:1".to_string(), "a".to_string())]);
    }

    #[tokio::test]
    async fn history_roundtrips_and_orders() {
        let history = SqliteHistory::new(
            Connection::open_in_memory().unwrap(),
            chrono::Duration::days(30),
        )
        .unwrap();
        let a = HealthResult::up("web", 15, Some(200)).attributed("c1", "j1");
        let mut b = HealthResult::down("web", "refused").attributed("c2", "j1");
        b.timestamp = a.timestamp - chrono::Duration::seconds(1);

        history.append(&a).await.unwrap();
        let stored_b = history.append(&b).await.unwrap();
        assert_eq!(
            stored_b.timestamp.timestamp_millis(),
            a.timestamp.timestamp_millis()
        );

        let recent = history.recent("web", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].cycle_id.as_deref(), Some("c1"));
        assert_eq!(recent[1].status, HealthStatus::Down);
        assert_eq!(recent[1].error.as_deref(), Some("refused"));
    }

    #[tokio::test]
    async fn history_purge_drops_old_rows() {
        let history = SqliteHistory::new(
            Connection::open_in_memory().unwrap(),
            chrono::Duration::days(30),
        )
        .unwrap();
        let mut old = HealthResult::up("web", 1, None);
        old.timestamp = Utc::now() - chrono::Duration::days(10);
        history.append(&old).await.unwrap();
        history.append(&HealthResult::up("web", 2, None)).await.unwrap();

        let removed = history
            .purge_older_than(Utc::now() - chrono::Duration::days(5))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(history.recent("web", 10).await.unwrap().len(), 1);
    }
}

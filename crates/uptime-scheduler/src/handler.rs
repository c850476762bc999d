use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uptime_store::HistoryStore;

use crate::types::Job;

/// Work behind a generic cron job, looked up by the job's handler name.
#[async_trait]
pub trait CronTask: Send + Sync {
    async fn run(&self, job: &Job) -> Result<(), String>;
}

/// Named cron handlers available to cycles.
#[derive(Clone, Default)]
pub struct CronHandlers {
    tasks: HashMap<String, Arc<dyn CronTask>>,
}

impl CronHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, task: Arc<dyn CronTask>) -> Self {
        self.tasks.insert(name.into(), task);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CronTask>> {
        self.tasks.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Name the gateway registers [`PurgeHistory`] under.
pub const PURGE_HISTORY: &str = "purge-history";

/// Drops history entries past the retention horizon.
pub struct PurgeHistory {
    history: Arc<dyn HistoryStore>,
    retention: chrono::Duration,
}

impl PurgeHistory {
    pub fn new(history: Arc<dyn HistoryStore>, retention: chrono::Duration) -> Self {
        Self { history, retention }
    }
}

#[async_trait]
impl CronTask for PurgeHistory {
    async fn run(&self, job: &Job) -> Result<(), String> {
        let cutoff = Utc::now() - self.retention;
        let removed = self
            .history
            .purge_older_than(cutoff)
            .await
            .map_err(|e| e.to_string())?;
        info!(job_id = %job.id(), removed, %cutoff, "history purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobDefinition, JobKind, Schedule};
    use uptime_core::HealthResult;
    use uptime_store::MemoryHistory;

    fn purge_job() -> Job {
        let now = Utc::now();
        Job {
            def: JobDefinition {
                id: "purge".to_string(),
                name: "purge".to_string(),
                kind: JobKind::Cron {
                    handler: PURGE_HISTORY.to_string(),
                },
                schedule: Schedule::Cron {
                    expression: "0 3 * * *".to_string(),
                },
                enabled: true,
                created_at: now,
                updated_at: now,
            },
            last_run_at: None,
            last_result: None,
        }
    }

    #[tokio::test]
    async fn purge_drops_entries_past_retention() {
        let history = Arc::new(MemoryHistory::new(chrono::Duration::days(365)));
        let mut old = HealthResult::up("api", 5, Some(200));
        old.timestamp = Utc::now() - chrono::Duration::days(10);
        history.append(&old).await.unwrap();
        history
            .append(&HealthResult::up("api", 5, Some(200)))
            .await
            .unwrap();

        let handlers = CronHandlers::new().register(
            PURGE_HISTORY,
            Arc::new(PurgeHistory::new(history.clone(), chrono::Duration::days(1))),
        );
        let task = handlers.get(PURGE_HISTORY).unwrap();
        task.run(&purge_job()).await.unwrap();

        assert_eq!(history.recent("api", 10).await.unwrap().len(), 1);
        assert!(handlers.get("missing").is_none());
        assert_eq!(handlers.names(), vec![PURGE_HISTORY]);
    }
}

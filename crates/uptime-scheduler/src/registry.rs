use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uptime_store::{
    kv::{get_json, set_json},
    CoordinationStore,
};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::keys;
use crate::schedule;
use crate::types::{Job, JobDefinition, JobKind, JobRun, JobSpec, JobUpdate};

/// Job definitions and their run state.
///
/// Definitions (`job:{id}`) are written only by admin calls; run state
/// (`job-run:{id}`) only by cycles. Keeping them on separate keys means a
/// cycle recording a run can never overwrite a concurrent admin edit.
#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn CoordinationStore>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// All jobs ordered by creation time. Undecodable entries are skipped.
    pub async fn list(&self) -> Result<Vec<Job>> {
        let defs = self.store.list_prefix(keys::JOB_PREFIX).await?;
        let runs = self.store.list_prefix(keys::JOB_RUN_PREFIX).await?;

        let mut run_by_id: HashMap<String, JobRun> = HashMap::new();
        for (key, raw) in runs {
            let id = key.trim_start_matches(keys::JOB_RUN_PREFIX).to_string();
            match serde_json::from_str::<JobRun>(&raw) {
                Ok(run) => {
                    run_by_id.insert(id, run);
                }
                Err(e) => warn!(%key, "skipping undecodable run state: {e}"),
            }
        }

        let mut jobs: Vec<Job> = defs
            .into_iter()
            .filter_map(|(key, raw)| match serde_json::from_str::<JobDefinition>(&raw) {
                Ok(def) => Some(def),
                Err(e) => {
                    warn!(%key, "skipping undecodable job: {e}");
                    None
                }
            })
            .map(|def| {
                let run = run_by_id.remove(&def.id);
                join(def, run)
            })
            .collect();
        jobs.sort_by(|a, b| {
            a.def
                .created_at
                .cmp(&b.def.created_at)
                .then_with(|| a.def.id.cmp(&b.def.id))
        });
        Ok(jobs)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let Some(def) = get_json::<JobDefinition>(self.store.as_ref(), &keys::job(id)).await?
        else {
            return Ok(None);
        };
        let run = self.run_state(id).await?;
        Ok(Some(join(def, run)))
    }

    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn create(&self, spec: JobSpec) -> Result<Job> {
        validate_name(&spec.name)?;
        validate_kind(&spec.kind)?;
        schedule::validate(&spec.schedule)?;

        let now = Utc::now();
        let def = JobDefinition {
            id: Uuid::new_v4().to_string(),
            name: spec.name.trim().to_string(),
            kind: spec.kind,
            schedule: spec.schedule,
            enabled: spec.enabled,
            created_at: now,
            updated_at: now,
        };
        set_json(self.store.as_ref(), &keys::job(&def.id), &def, None).await?;
        info!(job_id = %def.id, "job created");
        Ok(join(def, None))
    }

    /// Apply a partial update. Everything is validated before anything is
    /// written, so a rejected update leaves the stored job untouched.
    #[instrument(skip(self, update))]
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<Job> {
        let mut def = get_json::<JobDefinition>(self.store.as_ref(), &keys::job(id))
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;

        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(kind) = &update.kind {
            validate_kind(kind)?;
        }
        if let Some(schedule) = &update.schedule {
            schedule::validate(schedule)?;
        }

        if let Some(name) = update.name {
            def.name = name.trim().to_string();
        }
        if let Some(kind) = update.kind {
            def.kind = kind;
        }
        if let Some(schedule) = update.schedule {
            def.schedule = schedule;
        }
        if let Some(enabled) = update.enabled {
            def.enabled = enabled;
        }
        def.updated_at = Utc::now();

        set_json(self.store.as_ref(), &keys::job(id), &def, None).await?;
        info!(job_id = %id, "job updated");
        let run = self.run_state(id).await?;
        Ok(join(def, run))
    }

    /// Delete a job and its run state. Returns whether the job existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(&keys::job(id)).await?;
        self.store.delete(&keys::job_run(id)).await?;
        if removed {
            info!(job_id = %id, "job removed");
        }
        Ok(removed)
    }

    /// Enable or disable a job. Returns `false` when the job does not exist.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let update = JobUpdate {
            enabled: Some(enabled),
            ..JobUpdate::default()
        };
        match self.update(id, update).await {
            Ok(_) => Ok(true),
            Err(SchedulerError::JobNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store the outcome of a run. Only cycles call this.
    pub async fn record_run(&self, id: &str, run: &JobRun) -> Result<()> {
        set_json(self.store.as_ref(), &keys::job_run(id), run, None).await?;
        Ok(())
    }

    async fn run_state(&self, id: &str) -> Result<Option<JobRun>> {
        Ok(get_json(self.store.as_ref(), &keys::job_run(id)).await?)
    }
}

fn join(def: JobDefinition, run: Option<JobRun>) -> Job {
    let (last_run_at, last_result) = match run {
        Some(run) => (Some(run.last_run_at), Some(run.last_result)),
        None => (None, None),
    };
    Job {
        def,
        last_run_at,
        last_result,
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SchedulerError::Validation("name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_kind(kind: &JobKind) -> Result<()> {
    match kind {
        JobKind::ServiceCheck { service } => {
            if service.name.trim().is_empty() {
                return Err(SchedulerError::Validation(
                    "service name must not be empty".to_string(),
                ));
            }
            if service.url.trim().is_empty() {
                return Err(SchedulerError::Validation(
                    "service url must not be empty".to_string(),
                ));
            }
        }
        JobKind::Cron { handler } => {
            if handler.trim().is_empty() {
                return Err(SchedulerError::Validation(
                    "handler must not be empty".to_string(),
                ));
            }
        }
    }
    Ok(())
}

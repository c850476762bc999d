use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uptime_core::{HealthStatus, ServiceTarget};

/// Defines how often a job should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },

    /// Run according to a cron expression (5 or 6/7 fields, UTC).
    Cron { expression: String },
}

/// What a job does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Probe a service and append the result to its history.
    ServiceCheck { service: ServiceTarget },

    /// Run a named handler registered with the engine.
    Cron { handler: String },
}

/// Admin-owned part of a job, stored under `job:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// UUID v4 string.
    pub id: String,
    /// Human-readable label. Never empty.
    pub name: String,
    pub kind: JobKind,
    pub schedule: Schedule,
    /// Disabled jobs are skipped by cycles but kept for re-enabling.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How the last run of a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// Result of a job's most recent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// Probe classification; `None` for generic cron jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub cycle_id: String,
}

/// Scheduler-owned part of a job, stored under `job-run:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub last_run_at: DateTime<Utc>,
    pub last_result: RunResult,
}

/// A job as seen by readers: definition plus last run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(flatten)]
    pub def: JobDefinition,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<RunResult>,
}

impl Job {
    pub fn id(&self) -> &str {
        &self.def.id
    }
}

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub kind: JobKind,
    pub schedule: Schedule,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Admin action on an existing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobAction {
    Start,
    Stop,
    Update(JobUpdate),
}

/// Lifecycle state of a ping cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Completed,
    Superseded,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CycleStatus::Running => "running",
            CycleStatus::Completed => "completed",
            CycleStatus::Superseded => "superseded",
        };
        write!(f, "{s}")
    }
}

/// One execution of the due-job pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// Doubles as the lock owner id.
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    /// Cancellation epoch observed when the cycle began.
    pub epoch: u64,
    /// Epoch of the chain this cycle continues. Equal to `epoch` for a fresh
    /// chain, possibly lower when the arming trigger predates a cancel.
    pub chain_epoch: u64,
    pub status: CycleStatus,
}

/// Written by `cancel_all`; informational, the epoch counter is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationMarker {
    pub timestamp: DateTime<Utc>,
    pub epoch: u64,
}

/// Value held under the cycle lock key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder_cycle_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

/// The next invocation a self-trigger has been armed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmedTrigger {
    pub not_before: DateTime<Utc>,
    /// Chain epoch the resulting cycle continues.
    pub epoch: u64,
}

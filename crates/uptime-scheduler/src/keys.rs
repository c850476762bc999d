//! Coordination-store key layout.

use std::time::Duration;

/// Cycle lock. Holds a [`LockRecord`](crate::types::LockRecord) with the lock TTL.
pub const LOCK_KEY: &str = "lock:ping-cycle";

/// Most recently begun cycle.
pub const CYCLE_CURRENT: &str = "cycle:current";

/// Monotonic cancellation counter. Never expires.
pub const CANCEL_EPOCH: &str = "cycle:cancel-epoch";

/// Last cancellation request, for status readers.
pub const CANCEL_MARKER: &str = "cycle:cancel-marker";

/// Instant the store-backed self-trigger is armed for.
pub const TRIGGER_NOT_BEFORE: &str = "trigger:not-before";

/// Job definitions, written only by admin operations.
pub const JOB_PREFIX: &str = "job:";

/// Per-job run state, written only by cycles.
pub const JOB_RUN_PREFIX: &str = "job-run:";

pub const STATS_ACTIVE_CYCLES: &str = "stats:active-cycles";
pub const STATS_LAST_CYCLE_ID: &str = "stats:last-cycle-id";
pub const STATS_LAST_CYCLE_TIME: &str = "stats:last-cycle-time";
pub const STATS_LAST_PING: &str = "stats:last-ping";

/// Per-cycle records are kept for a day.
pub const CYCLE_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn cycle(id: &str) -> String {
    format!("cycle:{id}")
}

pub fn job(id: &str) -> String {
    format!("{JOB_PREFIX}{id}")
}

pub fn job_run(id: &str) -> String {
    format!("{JOB_RUN_PREFIX}{id}")
}

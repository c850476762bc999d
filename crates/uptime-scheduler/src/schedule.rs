use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};
use crate::types::Schedule;

/// Parse a cron expression.
///
/// Classic 5-field crontab lines get a leading `0` seconds field so both
/// `*/5 * * * *` and `0 */5 * * * *` are accepted.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule> {
    let fields = expression.split_whitespace().count();
    let normalised = if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    cron::Schedule::from_str(&normalised)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{expression}: {e}")))
}

/// Reject schedules that can never fire.
pub fn validate(schedule: &Schedule) -> Result<()> {
    match schedule {
        Schedule::Interval { every_secs: 0 } => Err(SchedulerError::InvalidSchedule(
            "interval must be at least one second".to_string(),
        )),
        Schedule::Interval { .. } => Ok(()),
        Schedule::Cron { expression } => parse_cron(expression).map(|_| ()),
    }
}

/// Compute the next UTC execution time for `schedule` strictly after `from`.
///
/// Returns `None` for an unparsable cron expression or one with no future
/// occurrence.
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Interval { every_secs } => {
            Some(from + Duration::seconds(i64::try_from(*every_secs).ok()?))
        }
        Schedule::Cron { expression } => parse_cron(expression).ok()?.after(&from).next(),
    }
}

/// When a job next becomes due.
///
/// An interval job that never ran is due from creation. A cron job that never
/// ran waits for its first occurrence after creation instead of firing
/// immediately.
pub fn next_due(
    schedule: &Schedule,
    last_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (schedule, last_run_at) {
        (_, Some(last)) => compute_next_run(schedule, last),
        (Schedule::Interval { .. }, None) => Some(created_at),
        (Schedule::Cron { .. }, None) => compute_next_run(schedule, created_at),
    }
}

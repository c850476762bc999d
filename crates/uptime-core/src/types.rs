use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Up,
    Down,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

/// A monitored service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    /// Display name; also the history key.
    pub name: String,
    pub url: String,
    /// Status code that counts as "up". Any 2xx when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
}

/// One probe result. Immutable once appended to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResult {
    pub service_name: String,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Cycle that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    /// Job that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl HealthResult {
    pub fn up(service_name: &str, response_time_ms: u64, status_code: Option<u16>) -> Self {
        Self {
            service_name: service_name.to_string(),
            status: HealthStatus::Up,
            timestamp: Utc::now(),
            response_time_ms: Some(response_time_ms),
            status_code,
            error: None,
            cycle_id: None,
            job_id: None,
        }
    }

    pub fn down(service_name: &str, error: impl Into<String>) -> Self {
        Self {
            service_name: service_name.to_string(),
            status: HealthStatus::Down,
            timestamp: Utc::now(),
            response_time_ms: None,
            status_code: None,
            error: Some(error.into()),
            cycle_id: None,
            job_id: None,
        }
    }

    /// Stamp the cycle and job this result belongs to.
    pub fn attributed(mut self, cycle_id: &str, job_id: &str) -> Self {
        self.cycle_id = Some(cycle_id.to_string());
        self.job_id = Some(job_id.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_str() {
        for status in [HealthStatus::Up, HealthStatus::Down, HealthStatus::Unknown] {
            let parsed: HealthStatus = status.to_string().parse().expect("parse failed");
            assert_eq!(parsed, status);
        }
        assert!("sideways".parse::<HealthStatus>().is_err());
    }

    #[test]
    fn attributed_sets_cycle_and_job() {
        let r = HealthResult::down("api", "connection refused").attributed("c-1", "j-1");
        assert_eq!(r.cycle_id.as_deref(), Some("c-1"));
        assert_eq!(r.job_id.as_deref(), Some("j-1"));
        assert_eq!(r.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let r = HealthResult::up("api", 12, Some(200));
        let v = serde_json::to_value(&r).expect("serialize");
        assert_eq!(v["status"], "up");
        assert!(v.get("error").is_none());
        assert!(v.get("cycle_id").is_none());
    }
}

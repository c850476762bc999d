use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_LOCK_TTL_MS: u64 = 60_000;
pub const DEFAULT_CYCLE_DEADLINE_MS: u64 = 30_000;
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Smallest gap allowed between the cycle deadline and the lock TTL.
pub const MIN_LOCK_MARGIN_MS: u64 = 1_000;

/// Top-level config (uptime.toml + UPTIME_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UptimeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Timing knobs for one ping cycle.
///
/// The lock must outlive the cycle deadline by at least
/// [`MIN_LOCK_MARGIN_MS`] or half the deadline, whichever is larger, since a
/// cycle still records results and rearms after its deadline. The per-job
/// timeout is independent of both; a job still running at the cycle deadline
/// is cut off there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    #[serde(default = "default_cycle_deadline_ms")]
    pub cycle_deadline_ms: u64,
    #[serde(default = "default_job_timeout_ms")]
    pub job_timeout_ms: u64,
    /// Rearm cadence when no job is enabled.
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
    /// Floor for the gap between two armed cycles.
    #[serde(default = "default_min_rearm_secs")]
    pub min_rearm_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            cycle_deadline_ms: DEFAULT_CYCLE_DEADLINE_MS,
            job_timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
            default_interval_secs: DEFAULT_INTERVAL_SECS,
            min_rearm_secs: default_min_rearm_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_millis(self.cycle_deadline_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }

    pub fn min_rearm(&self) -> Duration {
        Duration::from_secs(self.min_rearm_secs)
    }

    /// Time a cycle may spend recording and rearming after its deadline
    /// while still holding the lock.
    pub fn lock_margin_ms(&self) -> u64 {
        MIN_LOCK_MARGIN_MS.max(self.cycle_deadline_ms / 2)
    }

    /// Reject timing combinations where a cycle can outlive its lock.
    pub fn validate(&self) -> Result<()> {
        if self.job_timeout_ms == 0 || self.cycle_deadline_ms == 0 {
            return Err(CoreError::InvalidTiming(
                "job_timeout_ms and cycle_deadline_ms must be non-zero".to_string(),
            ));
        }
        let margin = self.lock_margin_ms();
        if self.lock_ttl_ms < self.cycle_deadline_ms.saturating_add(margin) {
            return Err(CoreError::InvalidTiming(format!(
                "lock_ttl_ms ({}) must be at least cycle_deadline_ms ({}) plus {} ms",
                self.lock_ttl_ms, self.cycle_deadline_ms, margin
            )));
        }
        if self.default_interval_secs == 0 {
            return Err(CoreError::InvalidTiming(
                "default_interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the next cycle gets invoked once the current one finishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerStrategy {
    /// Persist `not_before` and let an always-on poller call back.
    #[default]
    Store,
    /// Fire a deferred outbound HTTP call at `not_before`.
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub strategy: TriggerStrategy,
    /// Poll cadence of the always-on caller (store strategy only).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// URL the deferred strategy POSTs to. Defaults to this gateway's /ping.
    pub callback_url: Option<String>,
    /// Start a fresh chain when the gateway boots.
    #[serde(default = "bool_true")]
    pub start_on_boot: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            strategy: TriggerStrategy::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            callback_url: None,
            start_on_boot: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl HistoryConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_lock_ttl_ms() -> u64 {
    DEFAULT_LOCK_TTL_MS
}
fn default_cycle_deadline_ms() -> u64 {
    DEFAULT_CYCLE_DEADLINE_MS
}
fn default_job_timeout_ms() -> u64 {
    DEFAULT_JOB_TIMEOUT_MS
}
fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}
fn default_min_rearm_secs() -> u64 {
    1
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}
fn default_user_agent() -> String {
    format!("uptime-probe/{}", env!("CARGO_PKG_VERSION"))
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.uptime/uptime.db", home)
}

impl UptimeConfig {
    /// Load config from a TOML file with UPTIME_* env var overrides.
    ///
    /// Nested keys use a double underscore: `UPTIME_SCHEDULER__LOCK_TTL_MS`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: UptimeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("UPTIME_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.scheduler.validate()?;
        Ok(config)
    }

    /// Address the deferred trigger calls back to when none is configured.
    pub fn callback_url(&self) -> String {
        self.trigger.callback_url.clone().unwrap_or_else(|| {
            format!("http://{}:{}/ping", self.server.bind, self.server.port)
        })
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.uptime/uptime.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_timing_order() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.lock_ttl() > cfg.cycle_deadline());
    }

    #[test]
    fn lock_ttl_must_exceed_deadline() {
        let cfg = SchedulerConfig {
            lock_ttl_ms: 2_000,
            cycle_deadline_ms: 2_000,
            ..SchedulerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CoreError::InvalidTiming(_))));
    }

    #[test]
    fn lock_ttl_needs_margin_past_deadline() {
        let barely = SchedulerConfig {
            lock_ttl_ms: 2_001,
            cycle_deadline_ms: 2_000,
            ..SchedulerConfig::default()
        };
        assert!(matches!(barely.validate(), Err(CoreError::InvalidTiming(_))));

        // A long deadline needs half of itself again.
        let long = SchedulerConfig {
            lock_ttl_ms: 40_000,
            cycle_deadline_ms: 30_000,
            ..SchedulerConfig::default()
        };
        assert!(long.validate().is_err());

        let enough = SchedulerConfig {
            lock_ttl_ms: 3_000,
            cycle_deadline_ms: 2_000,
            ..SchedulerConfig::default()
        };
        assert!(enough.validate().is_ok());
    }

    #[test]
    fn job_timeout_may_exceed_deadline() {
        let cfg = SchedulerConfig {
            job_timeout_ms: 5_000,
            cycle_deadline_ms: 1_000,
            lock_ttl_ms: 10_000,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_deadline_is_rejected() {
        let cfg = SchedulerConfig {
            cycle_deadline_ms: 0,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_merges_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "uptime.toml",
                r#"
                [server]
                port = 9000

                [trigger]
                strategy = "deferred"

                [history]
                retention_days = 7
                "#,
            )?;
            jail.set_env("UPTIME_SCHEDULER__LOCK_TTL_MS", "90000");

            let cfg = UptimeConfig::load(Some("uptime.toml")).expect("config loads");
            assert_eq!(cfg.server.port, 9000);
            assert_eq!(cfg.trigger.strategy, TriggerStrategy::Deferred);
            assert_eq!(cfg.history.retention_days, 7);
            assert_eq!(cfg.scheduler.lock_ttl_ms, 90_000);
            assert_eq!(cfg.callback_url(), "http://127.0.0.1:9000/ping");
            Ok(())
        });
    }

    #[test]
    fn load_rejects_bad_timing() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "uptime.toml",
                r#"
                [scheduler]
                lock_ttl_ms = 1000
                cycle_deadline_ms = 5000
                job_timeout_ms = 500
                "#,
            )?;
            assert!(UptimeConfig::load(Some("uptime.toml")).is_err());
            Ok(())
        });
    }
}

//! HTTP probe: a GET against the service URL.
//!
//! Up when the response matches `expected_status` (any 2xx if unset). A
//! non-matching response is still a result (`down` with the status code); only
//! failures to get any response at all are errors.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;
use uptime_core::{HealthResult, ServiceTarget};

use crate::error::ProbeError;
use crate::HealthCheck;

pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::Timeout {
                ms: self.timeout.as_millis() as u64,
            }
        } else {
            ProbeError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl HealthCheck for HttpProbe {
    fn name(&self) -> &str {
        "http"
    }

    async fn check(&self, target: &ServiceTarget) -> Result<HealthResult, ProbeError> {
        let url = reqwest::Url::parse(&target.url)
            .map_err(|e| ProbeError::InvalidTarget(format!("{}: {e}", target.url)))?;

        let started = Instant::now();
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = resp.status();
        let code = status.as_u16();

        let healthy = match target.expected_status {
            Some(expected) => code == expected,
            None => status.is_success(),
        };

        if healthy {
            Ok(HealthResult::up(&target.name, elapsed_ms, Some(code)))
        } else {
            debug!(service = %target.name, %status, "probe got unexpected status");
            let mut result = HealthResult::down(&target.name, format!("unexpected status {code}"));
            result.status_code = Some(code);
            result.response_time_ms = Some(elapsed_ms);
            Ok(result)
        }
    }
}

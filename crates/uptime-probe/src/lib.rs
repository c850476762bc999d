//! `uptime-probe` — the health-check capability a service-check job invokes.
//!
//! The orchestrator only depends on the [`HealthCheck`] trait; [`HttpProbe`]
//! is the default implementation used by the gateway.

pub mod error;
pub mod http;

pub use error::ProbeError;
pub use http::HttpProbe;

use async_trait::async_trait;
use uptime_core::{HealthResult, ServiceTarget};

/// A pluggable health check.
///
/// Returns a [`HealthResult`] (which may itself be `down`, e.g. on a 5xx) or
/// fails with a transport/timeout error. Callers impose their own deadline on
/// top of any timeout the implementation applies.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn check(&self, target: &ServiceTarget) -> Result<HealthResult, ProbeError>;
}

//! `uptime-core` — configuration, error types and the health-result model
//! shared by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::UptimeConfig;
pub use error::{CoreError, Result};
pub use types::{HealthResult, HealthStatus, ServiceTarget};

pub mod health;
pub mod history;
pub mod jobs;
pub mod ping;
pub mod scheduler;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;
use uptime_scheduler::SchedulerError;

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<Value>);

/// Map a scheduler error onto an HTTP status with a JSON `{"error": ...}` body.
pub fn api_error(err: SchedulerError) -> ApiError {
    let status = match &err {
        SchedulerError::Validation(_) | SchedulerError::InvalidSchedule(_) => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(%status, "request failed: {err}");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

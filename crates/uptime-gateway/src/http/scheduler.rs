use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;
use uptime_scheduler::{types::CancellationMarker, SchedulerStatus};

use super::{api_error, ApiError};
use crate::app::AppState;

/// GET /scheduler/status
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SchedulerStatus>, ApiError> {
    state.engine.status().await.map(Json).map_err(api_error)
}

/// POST /scheduler/cancel
///
/// Every running or armed cycle stops rearming at its next decision point.
/// Poll status to see the chain wind down.
pub async fn cancel_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CancellationMarker>, ApiError> {
    let marker = state.engine.cancel_all().await.map_err(api_error)?;
    info!(epoch = marker.epoch, "cancel requested over http");
    Ok(Json(marker))
}

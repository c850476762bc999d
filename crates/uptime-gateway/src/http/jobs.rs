use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uptime_scheduler::{Job, JobAction, JobSpec};

use super::{api_error, ApiError};
use crate::app::AppState;

fn not_found(id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Job not found: {id}") })),
    )
}

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Job>>, ApiError> {
    state
        .engine
        .registry()
        .list()
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<JobSpec>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state
        .engine
        .registry()
        .create(spec)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.engine.registry().get(&id).await.map_err(api_error)? {
        Some(job) => Ok(Json(job)),
        None => Err(not_found(&id)),
    }
}

/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.engine.registry().remove(&id).await.map_err(api_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

/// PATCH /jobs/{id}, body `{"action": "start" | "stop" | "update", ...}`.
pub async fn apply_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(action): Json<JobAction>,
) -> Result<Json<Job>, ApiError> {
    state
        .engine
        .apply(&id, action)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /jobs/{id}/start
pub async fn start_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    toggle(&state, &id, true).await
}

/// POST /jobs/{id}/stop
pub async fn stop_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    toggle(&state, &id, false).await
}

async fn toggle(state: &AppState, id: &str, enabled: bool) -> Result<Json<Value>, ApiError> {
    let found = if enabled {
        state.engine.start_job(id).await
    } else {
        state.engine.stop_job(id).await
    }
    .map_err(api_error)?;
    if !found {
        return Err(not_found(id));
    }
    Ok(Json(json!({ "id": id, "enabled": enabled })))
}

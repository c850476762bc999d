//! Trigger ingress. Every cycle starts here.
//!
//! `POST /ping` starts a fresh chain; `POST /ping?epoch=N` is the continuation
//! call a deferred self-trigger makes. `POST /ping/poll` is for an external
//! always-on poller when the store trigger is in use.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;
use uptime_scheduler::{CycleOutcome, Invocation};

use super::{api_error, ApiError};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct PingQuery {
    pub epoch: Option<u64>,
}

/// POST /ping
pub async fn ping_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PingQuery>,
) -> Result<Json<CycleOutcome>, ApiError> {
    let invocation = match query.epoch {
        Some(epoch) => Invocation::Continuation { epoch },
        None => Invocation::Fresh,
    };
    let engine = Arc::clone(&state.engine);
    // Detached so a caller hanging up cannot cancel a cycle that holds the lock.
    let outcome = tokio::spawn(async move { engine.trigger(invocation).await })
        .await
        .map_err(|e| {
            error!("cycle task failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "cycle task failed"})),
            )
        })?
        .map_err(api_error)?;
    Ok(Json(outcome))
}

/// POST /ping/poll: run the armed continuation if it is due.
pub async fn poll_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let Some(pacemaker) = state.pacemaker.clone() else {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "polling is only used with the store trigger"})),
        ));
    };
    let beat = tokio::spawn(async move { pacemaker.beat().await })
        .await
        .map_err(|e| {
            error!("poll task failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "poll task failed"})),
            )
        })?;
    Ok(Json(match beat {
        Some(outcome) => json!({ "fired": true, "result": outcome }),
        None => json!({ "fired": false }),
    }))
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use uptime_core::HealthResult;

use super::ApiError;
use crate::app::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1_000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /history/{service}?limit=N
///
/// Newest N results, oldest first.
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HealthResult>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    state
        .engine
        .history()
        .recent(&service, limit)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(%service, "history read failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
        })
}

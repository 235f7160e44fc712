//! Scan route handlers.
//!
//! - POST   /scans/{dataset}            - Request a scan
//! - DELETE /scans/{dataset}            - Cancel the current scan
//! - POST   /scans/{dataset}/reset      - Administrative reset
//! - POST   /scans/{dataset}/reschedule - Re-register the automatic cadence
//! - GET    /scans/{dataset}/status     - Current status
//! - GET    /scans/{dataset}/history    - Job history (`?limit=N`)
//! - GET    /scans/{dataset}/insights   - History aggregates

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use linkaudit_scheduler::{ScanOptions, ScanOutcome, ScanTrigger};
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::ApiState;

/// Default and maximum page sizes of the history endpoint.
const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 500;

/// Body of a scan request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScanRequest {
    pub is_full_scan: bool,
    pub force_cancel: bool,
    pub queue_on_busy: bool,
    pub trigger: ScanTrigger,
    pub bypass_rest_window: bool,
    pub context: Option<String>,
    pub requested_by: Option<u64>,
}

/// Body of reset and reschedule requests.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdminRequest {
    pub actor: Option<u64>,
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// HTTP status of a scan outcome.
pub fn outcome_status(outcome: &ScanOutcome) -> StatusCode {
    if outcome.success {
        StatusCode::OK
    } else if outcome.requires_confirmation {
        StatusCode::CONFLICT
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    }
}

/// POST /scans/{dataset}
pub async fn request_scan(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
    Json(request): Json<ScanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scheduler = state.scheduler(&dataset)?;
    info!(
        "Scan requested for {} (full: {}, force: {}, queue: {})",
        dataset, request.is_full_scan, request.force_cancel, request.queue_on_busy
    );

    let options = ScanOptions {
        trigger: request.trigger,
        bypass_rest_window: request.bypass_rest_window,
        context: request.context.unwrap_or_else(|| "http".to_string()),
        requested_by: request.requested_by,
        ..Default::default()
    };
    let outcome = scheduler
        .request_scan(request.is_full_scan, request.force_cancel, request.queue_on_busy, options)
        .await?;
    Ok((outcome_status(&outcome), Json(outcome)))
}

/// DELETE /scans/{dataset}
pub async fn cancel_scan(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.scheduler(&dataset)?.cancel_scan().await?;
    Ok(Json(outcome))
}

/// POST /scans/{dataset}/reset
pub async fn reset(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
    request: Option<Json<AdminRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let outcome = state.scheduler(&dataset)?.reset(request.actor).await?;
    Ok(Json(outcome))
}

/// POST /scans/{dataset}/reschedule
pub async fn reschedule(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
    request: Option<Json<AdminRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let context = request.context.unwrap_or_else(|| "http".to_string());
    let outcome = state
        .scheduler(&dataset)?
        .reschedule_recurring_event(&context)
        .await?;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(outcome)))
}

/// GET /scans/{dataset}/status
pub async fn get_status(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.scheduler(&dataset)?.get_status().await?;
    let progress = status.progress_percent();
    Ok(Json(serde_json::json!({
        "dataset": dataset,
        "status": status,
        "progress_percent": progress,
    })))
}

/// GET /scans/{dataset}/history?limit=N
pub async fn get_history(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit > MAX_HISTORY_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be at most {}",
            MAX_HISTORY_LIMIT
        )));
    }
    let entries = state.scheduler(&dataset)?.get_history(limit).await?;
    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
    })))
}

/// GET /scans/{dataset}/insights
pub async fn get_insights(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let insights = state.scheduler(&dataset)?.get_insights().await?;
    Ok(Json(insights))
}

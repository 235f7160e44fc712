//! Batch executor callback handlers.
//!
//! The executor runs as a separate process and reports back here:
//! - POST /executor/{dataset}/started
//! - POST /executor/{dataset}/progress
//! - POST /executor/{dataset}/next
//! - POST /executor/{dataset}/terminal
//!
//! Reports for jobs that are no longer current are answered with
//! `accepted: false` rather than an error.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use linkaudit_scheduler::{JobMetrics, JobOutcome};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct StartedReport {
    pub job_id: String,
    #[serde(default)]
    pub total_batches: u64,
    #[serde(default)]
    pub total_items: u64,
}

#[derive(Debug, Deserialize)]
pub struct ProgressReport {
    pub job_id: String,
    #[serde(default)]
    pub processed_delta: u64,
    #[serde(default)]
    pub total_hint: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct NextBatchRequest {
    pub job_id: String,
    #[serde(default)]
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TerminalReport {
    pub job_id: String,
    pub outcome: JobOutcome,
    #[serde(default)]
    pub metrics: Option<JobMetrics>,
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /executor/{dataset}/started
pub async fn job_started(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
    Json(report): Json<StartedReport>,
) -> Result<impl IntoResponse, ApiError> {
    let accepted = state
        .scheduler(&dataset)?
        .on_job_started(&report.job_id, report.total_batches, report.total_items)
        .await?;
    Ok(Json(serde_json::json!({ "accepted": accepted })))
}

/// POST /executor/{dataset}/progress
pub async fn batch_progress(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
    Json(report): Json<ProgressReport>,
) -> Result<impl IntoResponse, ApiError> {
    let accepted = state
        .scheduler(&dataset)?
        .on_batch_progress(&report.job_id, report.processed_delta, report.total_hint)
        .await?;
    Ok(Json(serde_json::json!({ "accepted": accepted })))
}

/// POST /executor/{dataset}/next
pub async fn next_batch(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
    Json(request): Json<NextBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let next = state
        .scheduler(&dataset)?
        .schedule_next_batch(&request.job_id, request.delay_secs)
        .await?;
    Ok(Json(next))
}

/// POST /executor/{dataset}/terminal
pub async fn job_terminal(
    State(state): State<Arc<ApiState>>,
    Path(dataset): Path<String>,
    Json(report): Json<TerminalReport>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .scheduler(&dataset)?
        .on_job_terminal(&report.job_id, report.outcome, report.metrics, report.message)
        .await?;
    Ok(Json(outcome))
}

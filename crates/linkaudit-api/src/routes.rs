//! HTTP route definitions.

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::executor;
use crate::scans;
use crate::state::ApiState;

/// Create the router.
///
/// ## Route Structure
///
/// ```text
/// /scans/{dataset}
///   POST   /scans/{dataset}             - Request a scan
///   DELETE /scans/{dataset}             - Cancel the current scan
///   POST   /scans/{dataset}/reset       - Administrative reset
///   POST   /scans/{dataset}/reschedule  - Re-register the cadence
///   GET    /scans/{dataset}/status      - Current status
///   GET    /scans/{dataset}/history     - Job history
///   GET    /scans/{dataset}/insights    - History aggregates
///
/// /executor/{dataset}
///   POST   /executor/{dataset}/started  - First batch picked up
///   POST   /executor/{dataset}/progress - Batch finished
///   POST   /executor/{dataset}/next     - Schedule the next batch
///   POST   /executor/{dataset}/terminal - Job ended
///
/// POST /cron   - Run one polling cycle
/// GET  /health - Liveness
/// ```
pub fn create_router(state: Arc<ApiState>) -> Router {
    let scan_routes = Router::new()
        .route("/{dataset}", post(scans::request_scan).delete(scans::cancel_scan))
        .route("/{dataset}/reset", post(scans::reset))
        .route("/{dataset}/reschedule", post(scans::reschedule))
        .route("/{dataset}/status", get(scans::get_status))
        .route("/{dataset}/history", get(scans::get_history))
        .route("/{dataset}/insights", get(scans::get_insights));

    let executor_routes = Router::new()
        .route("/{dataset}/started", post(executor::job_started))
        .route("/{dataset}/progress", post(executor::batch_progress))
        .route("/{dataset}/next", post(executor::next_batch))
        .route("/{dataset}/terminal", post(executor::job_terminal));

    Router::new()
        .nest("/scans", scan_routes)
        .nest("/executor", executor_routes)
        .route("/cron", post(run_cron))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /cron
async fn run_cron(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    let report = state.schedulers.tick(Utc::now().timestamp()).await?;
    Ok(Json(report))
}

/// GET /health
async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime().as_secs(),
    }))
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;

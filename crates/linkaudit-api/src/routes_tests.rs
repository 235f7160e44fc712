use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use linkaudit_scheduler::{
    CronTriggerAdapter, MemoryOptionStore, MemoryScheduler, SchedulerOptions, SchedulerSet, StaticSettings,
    SystemIdentity,
};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn create_test_router() -> Router {
    let options = SchedulerOptions {
        retry_delay: Duration::from_millis(5),
        ..Default::default()
    };
    let schedulers = Arc::new(SchedulerSet::new(
        Arc::new(MemoryOptionStore::new()),
        Arc::new(MemoryScheduler::new()),
        options,
        Arc::new(CronTriggerAdapter::disabled()),
        Arc::new(StaticSettings::default()),
        Arc::new(SystemIdentity),
    ));
    create_router(Arc::new(ApiState::new(schedulers)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&body).unwrap())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let app = create_test_router();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_scan_request_flow() {
    let app = create_test_router();

    let (status, body) = send(&app, "POST", "/scans/link", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "POST", "/scans/link", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["requires_confirmation"], true);
    assert_eq!(body["current_state"], "queued");

    let (status, body) = send(&app, "POST", "/scans/link", Some(json!({"queue_on_busy": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queued"], true);
    assert_eq!(body["queue_length"], 1);

    let (status, body) = send(&app, "GET", "/scans/link/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "queued");
    assert_eq!(body["status"]["job_id"], job_id.as_str());
}

#[tokio::test]
async fn test_unknown_dataset() {
    let app = create_test_router();
    let (status, body) = send(&app, "GET", "/scans/video/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("video"));
}

#[tokio::test]
async fn test_cancel_twice() {
    let app = create_test_router();
    send(&app, "POST", "/scans/image", Some(json!({"is_full_scan": true}))).await;

    let (status, first) = send(&app, "DELETE", "/scans/image", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["was_active"], true);
    assert_eq!(first["cleared_counts"]["first_batch"], 1);

    let (status, second) = send(&app, "DELETE", "/scans/image", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["success"], true);
    assert_eq!(second["was_active"], false);
}

#[tokio::test]
async fn test_executor_lifecycle_and_cron() {
    let app = create_test_router();
    let (_, body) = send(&app, "POST", "/scans/link", Some(json!({}))).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    send(&app, "POST", "/scans/link", Some(json!({"queue_on_busy": true}))).await;

    let (status, tick) = send(&app, "POST", "/cron", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tick["batches"][0]["job_id"], job_id.as_str());

    let (_, started) = send(
        &app,
        "POST",
        "/executor/link/started",
        Some(json!({"job_id": job_id, "total_batches": 2, "total_items": 10})),
    )
    .await;
    assert_eq!(started["accepted"], true);

    let (_, progress) = send(
        &app,
        "POST",
        "/executor/link/progress",
        Some(json!({"job_id": job_id, "processed_delta": 5})),
    )
    .await;
    assert_eq!(progress["accepted"], true);

    let (_, next) = send(
        &app,
        "POST",
        "/executor/link/next",
        Some(json!({"job_id": job_id, "delay_secs": 0})),
    )
    .await;
    assert_eq!(next["action"], "scheduled");

    let (_, terminal) = send(
        &app,
        "POST",
        "/executor/link/terminal",
        Some(json!({"job_id": job_id, "outcome": "completed"})),
    )
    .await;
    assert_eq!(terminal["applied"], true);
    assert_eq!(terminal["status"]["state"], "completed");
    assert_eq!(terminal["drain"]["result"], "started");

    let (_, stale) = send(
        &app,
        "POST",
        "/executor/link/progress",
        Some(json!({"job_id": job_id, "processed_delta": 5})),
    )
    .await;
    assert_eq!(stale["accepted"], false);

    let (_, history) = send(&app, "GET", "/scans/link/history?limit=2", None).await;
    assert_eq!(history["count"], 2);
    assert_eq!(history["entries"][0]["state"], "queued");
    assert_eq!(history["entries"][1]["state"], "completed");

    let (_, insights) = send(&app, "GET", "/scans/link/insights", None).await;
    assert_eq!(insights["completed"], 1);
    assert_eq!(insights["success_rate"], 1.0);
}

#[tokio::test]
async fn test_history_limit_is_bounded() {
    let app = create_test_router();
    let (status, _) = send(&app, "GET", "/scans/link/history?limit=100000", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reset_and_reschedule() {
    let app = create_test_router();
    send(&app, "POST", "/scans/link", Some(json!({}))).await;

    let (status, reset) = send(&app, "POST", "/scans/link/reset", Some(json!({"actor": 3}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["cleared_counts"]["first_batch"], 1);

    let (_, history) = send(&app, "GET", "/scans/link/history", None).await;
    assert_eq!(history["entries"][0]["event"], "reset");
    assert_eq!(history["entries"][0]["actor"], 3);

    let (status, reschedule) = send(&app, "POST", "/scans/link/reschedule", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reschedule["success"], true);
    assert!(reschedule["next_run"].as_i64().is_some());
}

#[tokio::test]
async fn test_reset_and_reschedule_without_body() {
    let app = create_test_router();
    send(&app, "POST", "/scans/image", Some(json!({}))).await;

    let (status, reset) = send(&app, "POST", "/scans/image/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["cleared_counts"]["first_batch"], 1);

    let (_, history) = send(&app, "GET", "/scans/image/history", None).await;
    assert_eq!(history["entries"][0]["event"], "reset");
    assert_eq!(history["entries"][0]["actor"], 0);

    let (status, reschedule) = send(&app, "POST", "/scans/image/reschedule", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reschedule["success"], true);
}

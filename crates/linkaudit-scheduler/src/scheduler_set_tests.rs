use super::*;
use crate::dispatch::CronTriggerAdapter;
use crate::option_store::{MemoryOptionStore, SqliteOptionStore};
use crate::scheduler::ScanOptions;
use crate::settings::{StaticSettings, SystemIdentity};
use crate::status::ScanState;
use crate::substrate::{MemoryScheduler, SqliteScheduler};
use crate::test_support::{fast_options, BrokenSettings};
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

fn build(store: Arc<dyn OptionStore>, substrate: Arc<dyn SchedulingPrimitive>) -> SchedulerSet {
    SchedulerSet::new(
        store,
        substrate,
        fast_options(),
        Arc::new(CronTriggerAdapter::disabled()),
        Arc::new(StaticSettings::default()),
        Arc::new(SystemIdentity),
    )
}

fn memory_set() -> (Arc<MemoryScheduler>, SchedulerSet) {
    let substrate = Arc::new(MemoryScheduler::new());
    let set = build(Arc::new(MemoryOptionStore::new()), substrate.clone());
    (substrate, set)
}

#[tokio::test]
async fn test_datasets_are_independent() {
    let (_, set) = memory_set();
    let links = set.get(Dataset::Link).unwrap();
    let images = set.get(Dataset::Image).unwrap();

    assert!(links
        .request_scan(false, false, false, ScanOptions::manual("test"))
        .await
        .unwrap()
        .success);
    assert!(images
        .request_scan(true, false, false, ScanOptions::manual("test"))
        .await
        .unwrap()
        .success);
    assert_eq!(set.iter().count(), 2);
}

#[tokio::test]
async fn test_tick_returns_current_batches() {
    let (_, set) = memory_set();
    let links = set.get(Dataset::Link).unwrap();
    let job_id = links
        .request_scan(false, false, false, ScanOptions::manual("test"))
        .await
        .unwrap()
        .job_id
        .unwrap();

    let report = set.tick(Utc::now().timestamp() + 1).await.unwrap();
    assert_eq!(report.batches.len(), 1);
    let batch = &report.batches[0];
    assert_eq!(batch.dataset, Dataset::Link);
    assert_eq!(batch.hook, "linkaudit_link_first_batch");
    assert_eq!(batch.job_id, job_id);

    // Consumed
    assert!(set.tick(Utc::now().timestamp() + 1).await.unwrap().batches.is_empty());
}

#[tokio::test]
async fn test_tick_drops_stale_and_unknown() {
    let (substrate, set) = memory_set();
    substrate
        .schedule_once(0, "linkaudit_image_next_batch", &json!({"job_id": "gone"}))
        .await
        .unwrap();
    substrate.schedule_once(0, "unrelated_hook", &json!(null)).await.unwrap();

    let report = set.tick(10).await.unwrap();
    assert!(report.batches.is_empty());
    assert_eq!(report.stale, 1);
    assert_eq!(report.unknown, 1);
}

#[tokio::test]
async fn test_tick_runs_recurring_scan() {
    let (substrate, set) = memory_set();
    substrate
        .schedule_recurring(0, 3_600, "linkaudit_image_recurring", &json!(null))
        .await
        .unwrap();

    let report = set.tick(10).await.unwrap();
    assert_eq!(report.recurring.len(), 1);
    assert_eq!(report.recurring[0].dataset, Dataset::Image);
    assert!(report.recurring[0].outcome.success);

    let images = set.get(Dataset::Image).unwrap();
    assert_eq!(images.get_status().await.unwrap().state, ScanState::Queued);
    assert_eq!(substrate.next_scheduled("linkaudit_image_recurring", None).await.unwrap(), Some(3_600));
}

#[tokio::test]
async fn test_failing_recurring_event_keeps_due_batches() {
    let substrate = Arc::new(MemoryScheduler::new());
    let set = SchedulerSet::new(
        Arc::new(MemoryOptionStore::new()),
        substrate.clone(),
        fast_options(),
        Arc::new(CronTriggerAdapter::disabled()),
        Arc::new(BrokenSettings),
        Arc::new(SystemIdentity),
    );
    let links = set.get(Dataset::Link).unwrap();
    let job_id = links
        .request_scan(false, false, false, ScanOptions::manual("test"))
        .await
        .unwrap()
        .job_id
        .unwrap();
    substrate
        .schedule_recurring(0, 3_600, "linkaudit_image_recurring", &json!(null))
        .await
        .unwrap();

    let report = set.tick(Utc::now().timestamp() + 1).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].dataset, Dataset::Image);
    assert_eq!(report.failed[0].hook, "linkaudit_image_recurring");
    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.batches[0].job_id, job_id);

    assert_eq!(links.get_status().await.unwrap().state, ScanState::Queued);
    assert!(substrate
        .next_scheduled("linkaudit_image_recurring", None)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_reschedule_all() {
    let (substrate, set) = memory_set();
    let outcomes = set.reschedule_all("startup").await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, o)| o.success));
    assert_eq!(substrate.pending().await.len(), 2);
}

#[tokio::test]
async fn test_processes_share_state_through_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("linkaudit.db");

    async fn open(path: &std::path::Path) -> SchedulerSet {
        build(
            Arc::new(SqliteOptionStore::open(path).await.unwrap()),
            Arc::new(SqliteScheduler::open(path).await.unwrap()),
        )
    }

    // The orchestrator and the executor run as separate invocations
    let orchestrator = open(&path).await;
    let executor = open(&path).await;

    let job_id = orchestrator
        .get(Dataset::Link)
        .unwrap()
        .request_scan(false, false, false, ScanOptions::manual("cli"))
        .await
        .unwrap()
        .job_id
        .unwrap();

    let report = executor.tick(Utc::now().timestamp() + 1).await.unwrap();
    assert_eq!(report.batches[0].job_id, job_id);

    let links = executor.get(Dataset::Link).unwrap();
    assert!(links.on_job_started(&job_id, 2, 20).await.unwrap());

    orchestrator.get(Dataset::Link).unwrap().cancel_scan().await.unwrap();
    let next = links.schedule_next_batch(&job_id, Some(0)).await.unwrap();
    assert!(matches!(next, crate::scheduler_executor::NextBatch::Stop { .. }));
}

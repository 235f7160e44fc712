use super::*;
use crate::option_store::{MemoryOptionStore, SqliteOptionStore};
use tempfile::TempDir;

fn queue(capacity: usize) -> ManualRequestQueue {
    ManualRequestQueue::new(Arc::new(MemoryOptionStore::new()), Dataset::Link, capacity)
}

fn request(context: &str) -> ManualQueueEntry {
    ManualQueueEntry::new(false, 1, context)
}

#[tokio::test]
async fn test_fifo_order() {
    let queue = queue(0);
    for name in ["a", "b", "c"] {
        queue.enqueue(request(name)).await.unwrap();
    }
    assert_eq!(queue.length().await.unwrap(), 3);

    let mut popped = Vec::new();
    while let Some(entry) = queue.pop_front().await.unwrap() {
        popped.push(entry.context);
    }
    assert_eq!(popped, vec!["a", "b", "c"]);
    assert_eq!(queue.pop_front().await.unwrap(), None);
}

#[tokio::test]
async fn test_prepend_restores_original_position() {
    let queue = queue(0);
    for name in ["a", "b", "c"] {
        queue.enqueue(request(name)).await.unwrap();
    }

    let front = queue.pop_front().await.unwrap().unwrap();
    queue.prepend(front.clone()).await.unwrap();

    let entries = queue.entries().await.unwrap();
    assert_eq!(entries[0], front);
    let contexts: Vec<_> = entries.iter().map(|e| e.context.as_str()).collect();
    assert_eq!(contexts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_enqueue_rejected_at_capacity() {
    let queue = queue(2);
    assert_eq!(queue.enqueue(request("a")).await.unwrap(), 1);
    assert_eq!(queue.enqueue(request("b")).await.unwrap(), 2);

    let err = queue.enqueue(request("c")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::QueueFull { capacity: 2 }));
    assert_eq!(queue.length().await.unwrap(), 2);

    // Restoring a raced entry is never refused
    assert_eq!(queue.prepend(request("z")).await.unwrap(), 3);
}

#[tokio::test]
async fn test_clear_returns_count() {
    let queue = queue(0);
    assert_eq!(queue.clear().await.unwrap(), 0);

    queue.enqueue(request("a")).await.unwrap();
    queue.enqueue(request("b")).await.unwrap();
    assert_eq!(queue.clear().await.unwrap(), 2);
    assert_eq!(queue.length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_queues_are_per_dataset() {
    let options: Arc<dyn OptionStore> = Arc::new(MemoryOptionStore::new());
    let links = ManualRequestQueue::new(options.clone(), Dataset::Link, 0);
    let images = ManualRequestQueue::new(options, Dataset::Image, 0);

    links.enqueue(request("a")).await.unwrap();
    assert_eq!(links.length().await.unwrap(), 1);
    assert_eq!(images.length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_sqlite_queue_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");

    {
        let store = Arc::new(SqliteOptionStore::open(&path).await.unwrap());
        let queue = ManualRequestQueue::new(store, Dataset::Image, 10);
        queue.enqueue(ManualQueueEntry::new(true, 4, "cli")).await.unwrap();
    }

    let store = Arc::new(SqliteOptionStore::open(&path).await.unwrap());
    let queue = ManualRequestQueue::new(store, Dataset::Image, 10);
    let entry = queue.pop_front().await.unwrap().unwrap();
    assert!(entry.is_full_scan);
    assert_eq!(entry.requested_by, 4);
    assert_eq!(entry.context, "cli");
}

use super::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_memory_get_missing() {
    let store = MemoryOptionStore::new();
    assert!(store.get("absent").await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_update_sees_current_value() {
    let store = MemoryOptionStore::new();
    store.set("counter", json!(1)).await.unwrap();

    let next = store
        .update(
            "counter",
            Box::new(|current| json!(current.and_then(|v| v.as_i64()).unwrap_or(0) + 1)),
        )
        .await
        .unwrap();
    assert_eq!(next, json!(2));
    assert_eq!(store.get("counter").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_sqlite_set_get_delete() {
    let store = SqliteOptionStore::in_memory().await.unwrap();
    store.set("status", json!({"state": "idle"})).await.unwrap();
    assert_eq!(
        store.get("status").await.unwrap(),
        Some(json!({"state": "idle"}))
    );

    store.delete("status").await.unwrap();
    assert!(store.get("status").await.unwrap().is_none());

    // Deleting again is fine
    store.delete("status").await.unwrap();
}

#[tokio::test]
async fn test_sqlite_visible_across_connections() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("options.db");

    let writer = SqliteOptionStore::open(&path).await.unwrap();
    writer.set("linkaudit_link_status", json!({"state": "queued"})).await.unwrap();

    let reader = SqliteOptionStore::open(&path).await.unwrap();
    assert_eq!(
        reader.get("linkaudit_link_status").await.unwrap(),
        Some(json!({"state": "queued"}))
    );
}

#[tokio::test]
async fn test_sqlite_concurrent_updates_serialize() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("options.db");
    let first = Arc::new(SqliteOptionStore::open(&path).await.unwrap());
    let second = Arc::new(SqliteOptionStore::open(&path).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = if i % 2 == 0 { first.clone() } else { second.clone() };
        handles.push(tokio::spawn(async move {
            store
                .update(
                    "counter",
                    Box::new(|current| json!(current.and_then(|v| v.as_i64()).unwrap_or(0) + 1)),
                )
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(first.get("counter").await.unwrap(), Some(json!(20)));
}

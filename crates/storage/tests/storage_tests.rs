// crates/storage/tests/storage_tests.rs
//! Behavior shared by every storage strategy

use offsync_storage::{open_store, KeyValueStore, StorageStrategy};
use std::sync::Arc;
use tempfile::TempDir;

async fn exercise_contract(store: Arc<dyn KeyValueStore>) {
    assert_eq!(store.get("dataset:missing").await.unwrap(), None);

    store.set("dataset:b", b"{\"b\":1}".to_vec()).await.unwrap();
    store.set("dataset:a", b"{\"a\":1}".to_vec()).await.unwrap();
    assert_eq!(store.keys().await.unwrap(), vec!["dataset:a", "dataset:b"]);

    store.remove("dataset:a").await.unwrap();
    store.remove("dataset:a").await.unwrap();
    assert_eq!(store.get("dataset:a").await.unwrap(), None);
    assert_eq!(
        store.get("dataset:b").await.unwrap(),
        Some(b"{\"b\":1}".to_vec())
    );

    store.clear().await.unwrap();
    assert!(store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_contract() {
    let store = open_store(StorageStrategy::Memory, None).await.unwrap();
    exercise_contract(store).await;
}

#[tokio::test]
async fn test_disk_contract() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(StorageStrategy::Disk, Some(temp_dir.path()))
        .await
        .unwrap();
    exercise_contract(store).await;
}

#[tokio::test]
async fn test_sqlite_contract() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("contract.db");
    let store = open_store(StorageStrategy::Sqlite, Some(&path))
        .await
        .unwrap();
    exercise_contract(store).await;
}

#[tokio::test]
async fn test_disk_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = open_store(StorageStrategy::Disk, Some(temp_dir.path()))
            .await
            .unwrap();
        store.set("dataset:tasks", b"persisted".to_vec()).await.unwrap();
    }

    let reopened = open_store(StorageStrategy::Disk, Some(temp_dir.path()))
        .await
        .unwrap();
    assert_eq!(
        reopened.get("dataset:tasks").await.unwrap(),
        Some(b"persisted".to_vec())
    );
}

#[tokio::test]
async fn test_sqlite_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("reopen.db");

    {
        let store = open_store(StorageStrategy::Sqlite, Some(&path))
            .await
            .unwrap();
        store.set("dataset:tasks", b"persisted".to_vec()).await.unwrap();
    }

    let reopened = open_store(StorageStrategy::Sqlite, Some(&path))
        .await
        .unwrap();
    assert_eq!(
        reopened.get("dataset:tasks").await.unwrap(),
        Some(b"persisted".to_vec())
    );
}

#[tokio::test]
async fn test_memory_does_not_survive_reopen() {
    let store = open_store(StorageStrategy::Memory, None).await.unwrap();
    store.set("dataset:tasks", b"gone".to_vec()).await.unwrap();

    let fresh = open_store(StorageStrategy::Memory, None).await.unwrap();
    assert_eq!(fresh.get("dataset:tasks").await.unwrap(), None);
}

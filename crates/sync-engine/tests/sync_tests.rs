// crates/sync-engine/tests/sync_tests.rs
//! Integration tests for reconciliation cycles

use offsync_storage::MemoryStore;
use offsync_sync_engine::{
    Action, CycleOutcome, DatasetConfig, DatasetManager, EventCode, EventMessage, MemoryRemote,
    ReconcileResponse, RecordId, ServerStatus, SyncEvent,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

fn manual_config() -> DatasetConfig {
    DatasetConfig::default()
        .with_auto_sync(false)
        .with_sync_frequency(Duration::from_secs(3600))
        .with_request_timeout(Duration::from_secs(5))
}

fn setup(remote: &Arc<MemoryRemote>) -> DatasetManager {
    let _ = env_logger::builder().is_test(true).try_init();
    DatasetManager::new(remote.clone(), Arc::new(MemoryStore::new()), manual_config())
}

async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>, code: EventCode) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.code == code => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("notification bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Creates a record and syncs it, returning its uid
async fn synced_record(manager: &DatasetManager, data: serde_json::Value) -> String {
    let receipt = manager.do_create("X", data).await.unwrap();
    assert_eq!(manager.force_sync("X").await.unwrap(), CycleOutcome::Completed);
    match manager.get_uid(&receipt.hash).await {
        RecordId::Remote(uid) => uid,
        other => panic!("create was not acknowledged: {:?}", other),
    }
}

#[tokio::test]
async fn test_create_is_readable_before_any_cycle() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();

    let receipt = manager.do_create("X", json!({"test": "text"})).await.unwrap();
    assert_eq!(receipt.action, Action::Create);
    assert_eq!(receipt.post, Some(json!({"test": "text"})));

    let record = manager.do_read("X", receipt.uid.as_str()).await.unwrap();
    assert_eq!(record.data, json!({"test": "text"}));
    assert!(remote.records("X").is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_create_roundtrip_through_automatic_cycle() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    let mut events = manager.subscribe();

    manager
        .manage(
            "X",
            Some(
                manual_config()
                    .with_auto_sync(true)
                    .with_sync_frequency(Duration::from_millis(20)),
            ),
        )
        .await
        .unwrap();

    let receipt = manager.do_create("X", json!({"test": "text"})).await.unwrap();
    let applied = next_event(&mut events, EventCode::RemoteUpdateApplied).await;

    assert_eq!(applied.dataset_id, "X");
    assert_eq!(applied.message.action(), Some(Action::Create));

    let uid = manager.get_uid(&receipt.hash).await;
    assert!(uid.is_remote());
    assert_ne!(uid.as_str(), receipt.hash);
    assert_eq!(applied.uid.as_deref(), Some(uid.as_str()));

    let record = manager.do_read("X", uid.as_str()).await.unwrap();
    assert_eq!(record.data, json!({"test": "text"}));
    assert!(!record.hash.is_empty());
    assert_eq!(remote.record("X", uid.as_str()), Some(json!({"test": "text"})));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_cycle_events_in_order() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();
    manager.do_create("X", json!(1)).await.unwrap();

    let mut events = manager.subscribe();
    manager.force_sync("X").await.unwrap();

    let codes: Vec<EventCode> = (0..3).map(|_| events.try_recv().unwrap().code).collect();
    assert_eq!(
        codes,
        vec![
            EventCode::SyncStarted,
            EventCode::RemoteUpdateApplied,
            EventCode::SyncComplete
        ]
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_sync_complete_reports_online() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();
    let mut events = manager.subscribe();

    manager.force_sync("X").await.unwrap();

    let started = next_event(&mut events, EventCode::SyncStarted).await;
    assert_eq!(started.message, EventMessage::None);
    let complete = next_event(&mut events, EventCode::SyncComplete).await;
    assert_eq!(complete.message.as_text(), Some("online"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_crash_recovery() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager
        .manage("X", Some(manual_config().with_crashed_count_wait(3)))
        .await
        .unwrap();

    let receipt = manager.do_create("X", json!({"k": "v"})).await.unwrap();
    remote.set_status(ServerStatus::crashed(500));

    for attempt in 1..=3 {
        let outcome = manager.force_sync("X").await.unwrap();
        assert_eq!(outcome, CycleOutcome::Failed("status_500".to_string()));

        let pending = manager.get_pending("X").await.unwrap();
        let entry = &pending[&receipt.hash];
        assert!(entry.in_flight);
        assert_eq!(entry.attempt_count, attempt);
        assert_eq!(entry.crashed, attempt >= 3);
    }

    // Local reads keep working while the remote is down
    assert!(manager.do_read("X", &receipt.hash).await.is_ok());

    remote.set_status(ServerStatus::healthy());
    assert_eq!(manager.force_sync("X").await.unwrap(), CycleOutcome::Completed);
    assert!(manager.get_pending("X").await.unwrap().is_empty());
    assert_eq!(remote.records("X").len(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_collision_on_divergent_update() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();

    let uid = synced_record(&manager, json!({"title": "draft"})).await;

    assert!(remote.update_record("X", &uid, json!({"title": "theirs"})));
    let update = manager
        .do_update("X", &uid, json!({"title": "mine"}))
        .await
        .unwrap();

    let mut events = manager.subscribe();
    assert_eq!(manager.force_sync("X").await.unwrap(), CycleOutcome::Completed);

    let detected = next_event(&mut events, EventCode::CollisionDetected).await;
    assert_eq!(
        detected.message,
        EventMessage::Collision {
            uid: uid.clone(),
            hash: update.hash.clone()
        }
    );

    let collisions = manager.list_collisions("X").await.unwrap();
    assert_eq!(collisions.len(), 1);
    let collision = &collisions[&update.hash];
    assert_eq!(collision.uid, uid);
    assert_eq!(collision.local, Some(json!({"title": "mine"})));
    assert_eq!(collision.remote, Some(json!({"title": "theirs"})));

    // The doomed change is not retried
    assert!(manager.get_pending("X").await.unwrap().is_empty());
    assert_eq!(remote.record("X", &uid), Some(json!({"title": "theirs"})));

    assert!(manager
        .remove_collision("X", &update.hash)
        .await
        .unwrap()
        .is_some());
    assert!(manager.list_collisions("X").await.unwrap().is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_update_against_remote_delete_collides() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();

    let uid = synced_record(&manager, json!(1)).await;
    assert!(remote.delete_record("X", &uid));
    let update = manager.do_update("X", &uid, json!(2)).await.unwrap();

    manager.force_sync("X").await.unwrap();

    let collisions = manager.list_collisions("X").await.unwrap();
    let collision = &collisions[&update.hash];
    assert_eq!(collision.remote, None);
    assert_eq!(collision.remote_hash, None);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_remote_changes_are_applied() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();
    let mut events = manager.subscribe();

    let uid = remote.create_record("X", json!({"from": "other client"}));
    manager.force_sync("X").await.unwrap();

    let received = next_event(&mut events, EventCode::RecordDeltaReceived).await;
    assert_eq!(received.message.as_text(), Some("create"));
    assert_eq!(received.uid.as_deref(), Some(uid.as_str()));

    let listed = manager.do_list("X").await.unwrap();
    assert_eq!(listed[&uid].data, json!({"from": "other client"}));
    assert_eq!(listed[&uid].id, RecordId::Remote(uid.clone()));

    remote.update_record("X", &uid, json!({"from": "edited"}));
    manager.force_sync("X").await.unwrap();
    assert_eq!(
        manager.do_read("X", &uid).await.unwrap().data,
        json!({"from": "edited"})
    );

    remote.delete_record("X", &uid);
    manager.force_sync("X").await.unwrap();
    let err = manager.do_read("X", &uid).await.unwrap_err();
    assert_eq!(err.to_string(), "unknown_uid");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_update_and_delete_reach_remote() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();

    let uid = synced_record(&manager, json!({"n": 1})).await;

    manager.do_update("X", &uid, json!({"n": 2})).await.unwrap();
    manager.do_update("X", &uid, json!({"n": 3})).await.unwrap();
    assert_eq!(manager.get_pending("X").await.unwrap().len(), 1);

    manager.force_sync("X").await.unwrap();
    assert_eq!(remote.record("X", &uid), Some(json!({"n": 3})));
    assert!(manager.get_pending("X").await.unwrap().is_empty());

    manager.do_delete("X", &uid).await.unwrap();
    assert!(manager.do_read("X", &uid).await.is_err());
    manager.force_sync("X").await.unwrap();
    assert_eq!(remote.record("X", &uid), None);
    assert!(manager.get_pending("X").await.unwrap().is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_forced_response_keeps_entries_in_flight() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();
    let receipt = manager.do_create("X", json!("value")).await.unwrap();

    remote.set_status(ServerStatus::forced(ReconcileResponse::empty()));
    assert_eq!(manager.force_sync("X").await.unwrap(), CycleOutcome::Completed);

    let pending = manager.get_pending("X").await.unwrap();
    let entry = &pending[&receipt.hash];
    assert!(entry.in_flight);
    assert!(!entry.crashed);
    assert_eq!(entry.failed_count, 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_change_queued_behind_in_flight_create() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();

    let created = manager.do_create("X", json!({"v": 1})).await.unwrap();

    // First cycle sends the create but gets no ack
    remote.set_status(ServerStatus::forced(ReconcileResponse::empty()));
    manager.force_sync("X").await.unwrap();

    let update = manager
        .do_update("X", created.uid.as_str(), json!({"v": 2}))
        .await
        .unwrap();
    let pending = manager.get_pending("X").await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending[&update.hash].delayed);
    assert_eq!(
        pending[&update.hash].waiting_for.as_deref(),
        Some(created.hash.as_str())
    );

    remote.set_status(ServerStatus::healthy());
    manager.force_sync("X").await.unwrap();
    let uid = manager.get_uid(&created.hash).await;
    assert!(uid.is_remote());

    let pending = manager.get_pending("X").await.unwrap();
    let follower = &pending[&update.hash];
    assert!(!follower.delayed);
    assert_eq!(follower.uid, uid);

    manager.force_sync("X").await.unwrap();
    assert!(manager.get_pending("X").await.unwrap().is_empty());
    assert_eq!(remote.record("X", uid.as_str()), Some(json!({"v": 2})));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_offline_cycles_fail_without_remote_call() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = setup(&remote);
    manager.manage("X", None).await.unwrap();
    manager.set_online(false);

    let mut events = manager.subscribe();
    manager.do_update("X", "missing", json!(1)).await.unwrap_err();
    let receipt = manager.do_create("X", json!(1)).await.unwrap();

    let offline = next_event(&mut events, EventCode::OfflineUpdate).await;
    assert_eq!(offline.uid.as_deref(), Some(receipt.hash.as_str()));

    assert_eq!(
        manager.force_sync("X").await.unwrap(),
        CycleOutcome::Failed("offline".to_string())
    );
    let failed = next_event(&mut events, EventCode::SyncFailed).await;
    assert_eq!(failed.message.as_text(), Some("offline"));
    assert!(remote.records("X").is_empty());

    manager.set_online(true);
    assert_eq!(manager.force_sync("X").await.unwrap(), CycleOutcome::Completed);
    assert_eq!(remote.records("X").len(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_clear_cache_during_cycle_discards_result() {
    let remote = Arc::new(MemoryRemote::new().with_latency(Duration::from_millis(150)));
    let manager = Arc::new(setup(&remote));
    manager.manage("X", None).await.unwrap();
    manager.do_create("X", json!(1)).await.unwrap();

    let cycle = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.force_sync("X").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.clear_cache("X").await.unwrap();

    assert_eq!(cycle.await.unwrap().unwrap(), CycleOutcome::Skipped);
    let err = manager.do_read("X", "anything").await.unwrap_err();
    assert_eq!(err.to_string(), "unknown_dataset X");

    manager.manage("X", None).await.unwrap();
    assert!(manager.get_pending("X").await.unwrap().is_empty());

    manager.shutdown().await;
}

// crates/sync-engine/examples/sync_demo.rs
//! Demonstration of sync engine capabilities

use offsync_storage::MemoryStore;
use offsync_sync_engine::{
    DatasetConfig, DatasetManager, MemoryRemote, RecordId, ServerStatus, SyncResult,
};
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> SyncResult<()> {
    println!("offsync Sync Engine Demo");
    println!("========================\n");

    demo_basic_sync().await?;
    println!();
    demo_crash_recovery().await?;
    println!();
    demo_collision().await?;
    Ok(())
}

fn setup() -> (Arc<MemoryRemote>, DatasetManager) {
    let remote = Arc::new(MemoryRemote::new());
    let manager = DatasetManager::new(
        remote.clone(),
        Arc::new(MemoryStore::new()),
        DatasetConfig::default()
            .with_auto_sync(false)
            .with_crashed_count_wait(2),
    );
    manager.notify(|event| {
        println!("  [{}] {} {:?}", event.dataset_id, event.code, event.message);
    });
    (remote, manager)
}

async fn demo_basic_sync() -> SyncResult<()> {
    println!("1. Basic Synchronization");
    println!("------------------------");

    let (_remote, manager) = setup();
    manager.manage("notes", None).await?;

    let receipt = manager
        .do_create("notes", serde_json::json!({"title": "Call me Ishmael"}))
        .await?;
    println!("Created with temporary id {}", receipt.uid);

    manager.force_sync("notes").await?;

    let uid = manager.get_uid(&receipt.hash).await;
    println!("Remote assigned uid {}", uid);

    let record = manager.do_read("notes", uid.as_str()).await?;
    println!("Read back {} (hash {})", record.data, record.hash);

    manager.shutdown().await;
    Ok(())
}

async fn demo_crash_recovery() -> SyncResult<()> {
    println!("2. Crash Recovery");
    println!("-----------------");

    let (remote, manager) = setup();
    manager.manage("notes", None).await?;
    let receipt = manager
        .do_create("notes", serde_json::json!({"title": "survives outages"}))
        .await?;

    remote.set_status(ServerStatus::crashed(503));
    for _ in 0..2 {
        manager.force_sync("notes").await?;
    }

    let pending = manager.get_pending("notes").await?;
    if let Some(entry) = pending.get(&receipt.hash) {
        println!(
            "Pending entry: in_flight={} crashed={} attempts={}",
            entry.in_flight, entry.crashed, entry.attempt_count
        );
    }

    remote.set_status(ServerStatus::healthy());
    manager.force_sync("notes").await?;
    println!(
        "Pending after recovery: {}",
        manager.get_pending("notes").await?.len()
    );

    manager.shutdown().await;
    Ok(())
}

async fn demo_collision() -> SyncResult<()> {
    println!("3. Collision Detection");
    println!("----------------------");

    let (remote, manager) = setup();
    manager.manage("notes", None).await?;

    let receipt = manager
        .do_create("notes", serde_json::json!({"position": 100}))
        .await?;
    manager.force_sync("notes").await?;

    let uid = match manager.get_uid(&receipt.hash).await {
        RecordId::Remote(uid) => uid,
        RecordId::Local(_) => {
            println!("Create was not acknowledged");
            return Ok(());
        }
    };

    println!("Phone: setting position to 2000");
    remote.update_record("notes", &uid, serde_json::json!({"position": 2000}));

    println!("Laptop: setting position to 1000");
    manager
        .do_update("notes", &uid, serde_json::json!({"position": 1000}))
        .await?;

    manager.force_sync("notes").await?;

    for (hash, collision) in manager.list_collisions("notes").await? {
        println!(
            "Collision {}: local {:?} vs remote {:?}",
            hash, collision.local, collision.remote
        );
        manager.remove_collision("notes", &hash).await?;
    }

    manager.shutdown().await;
    Ok(())
}

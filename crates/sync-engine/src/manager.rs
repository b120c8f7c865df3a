// crates/sync-engine/src/manager.rs
//! Public entry point for managing datasets
//!
//! [`DatasetManager`] owns every dataset's state, the notification bus and
//! the collaborators (remote authority and local key-value store). Local
//! reads and writes never wait on the remote; they only fail for an unknown
//! dataset, an unknown record, or a local storage error.

use crate::dataset::{storage_key, DatasetSnapshot, DatasetState};
use crate::error::{SyncError, SyncResult};
use crate::notify::{EventCode, NotificationBus, SubscriptionId, SyncEvent};
use crate::protocol::Remote;
use crate::sync_loop::{CyclePhase, Dataset, LoopCommand, SyncContext};
use crate::types::{
    ChangeReceipt, Collision, CycleOutcome, DatasetConfig, DatasetStatus, PendingEntry, Record,
    RecordId,
};
use offsync_config::Config;
use offsync_storage::{open_store, KeyValueStore};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Manages local replicas of named datasets and keeps them reconciled
pub struct DatasetManager {
    datasets: RwLock<HashMap<String, Arc<Dataset>>>,
    ctx: Arc<SyncContext>,
    default_config: DatasetConfig,
}

impl DatasetManager {
    /// Creates a manager with no datasets
    pub fn new(
        remote: Arc<dyn Remote>,
        store: Arc<dyn KeyValueStore>,
        default_config: DatasetConfig,
    ) -> Self {
        Self {
            datasets: RwLock::new(HashMap::new()),
            ctx: Arc::new(SyncContext {
                remote,
                store,
                bus: Arc::new(NotificationBus::new()),
                online: AtomicBool::new(true),
            }),
            default_config,
        }
    }

    /// Creates a manager from the application config, opening the configured store
    pub async fn from_config(config: &Config, remote: Arc<dyn Remote>) -> SyncResult<Self> {
        let path = config.storage.resolved_path();
        let store = open_store(config.storage.strategy, Some(path.as_path())).await?;

        log::info!(
            "Using {} storage, sync every {:?}",
            config.storage.strategy,
            config.sync.sync_frequency()
        );

        Ok(Self::new(remote, store, DatasetConfig::from(&config.sync))
            .with_console_log(config.app.do_console_log))
    }

    /// Also logs every notification at info level
    pub fn with_console_log(self, enabled: bool) -> Self {
        self.ctx.bus.set_console_log(enabled);
        self
    }

    /// Default settings for datasets managed without explicit config
    pub fn default_config(&self) -> &DatasetConfig {
        &self.default_config
    }

    /// Starts managing a dataset
    ///
    /// Restores the dataset's saved snapshot, if any, and starts its loop. On
    /// an already managed dataset only the config is replaced; no state is
    /// reset and a running cycle is left alone.
    pub async fn manage(&self, dataset_id: &str, config: Option<DatasetConfig>) -> SyncResult<()> {
        let existing = self.datasets.read().await.get(dataset_id).cloned();
        if let Some(dataset) = existing {
            self.reconfigure(&dataset, config).await;
            return Ok(());
        }

        // The snapshot is read without holding the dataset map lock
        let saved = self.ctx.store.get(&storage_key(dataset_id)).await?;

        let mut datasets = self.datasets.write().await;
        if let Some(dataset) = datasets.get(dataset_id).cloned() {
            drop(datasets);
            self.reconfigure(&dataset, config).await;
            return Ok(());
        }

        let config = config.unwrap_or_else(|| self.default_config.clone());
        let state = match saved {
            Some(bytes) => {
                let snapshot = DatasetSnapshot::from_bytes(&bytes)?;
                log::info!(
                    "[{}] Restored {} records, {} pending changes",
                    dataset_id,
                    snapshot.records.len(),
                    snapshot.pending.len()
                );
                DatasetState::from_snapshot(snapshot, config)
            }
            None => DatasetState::new(config),
        };

        let dataset = Dataset::spawn(dataset_id.to_string(), state, Arc::clone(&self.ctx));
        datasets.insert(dataset_id.to_string(), dataset);
        log::info!("[{}] Managing dataset", dataset_id);
        Ok(())
    }

    async fn reconfigure(&self, dataset: &Dataset, config: Option<DatasetConfig>) {
        if let Some(config) = config {
            dataset.state.write().await.config = config;
            dataset.send(LoopCommand::Reschedule);
            log::debug!("[{}] Config updated", dataset.id);
        }
    }

    async fn dataset(&self, dataset_id: &str) -> SyncResult<Arc<Dataset>> {
        self.datasets
            .read()
            .await
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownDataset(dataset_id.to_string()))
    }

    async fn mutate<F>(&self, dataset_id: &str, change: F) -> SyncResult<ChangeReceipt>
    where
        F: FnOnce(&mut DatasetState) -> SyncResult<ChangeReceipt>,
    {
        let dataset = self.dataset(dataset_id).await?;
        let receipt = {
            let mut state = dataset.state.write().await;
            if state.cleared {
                return Err(SyncError::UnknownDataset(dataset_id.to_string()));
            }
            let before = state.clone();
            let receipt = change(&mut *state)?;
            if let Err(err) = dataset.persist(self.ctx.store.as_ref(), &state).await {
                log::warn!("[{}] Local change not saved, rolling back: {}", dataset_id, err);
                *state = before;
                return Err(err);
            }
            receipt
        };

        let action = receipt.action.as_str();
        self.ctx.bus.emit(
            SyncEvent::new(dataset_id, EventCode::LocalUpdateApplied)
                .with_uid(receipt.uid.as_str())
                .with_text(action),
        );
        if !self.ctx.is_online() {
            self.ctx.bus.emit(
                SyncEvent::new(dataset_id, EventCode::OfflineUpdate)
                    .with_uid(receipt.uid.as_str())
                    .with_text(action),
            );
        }
        Ok(receipt)
    }

    /// Creates a record locally; it is pushed by the next cycle
    pub async fn do_create(&self, dataset_id: &str, data: Value) -> SyncResult<ChangeReceipt> {
        self.mutate(dataset_id, |state| Ok(state.create(data))).await
    }

    /// Reads a record by uid or by the hash returned from `do_create`
    pub async fn do_read(&self, dataset_id: &str, uid: &str) -> SyncResult<Record> {
        let dataset = self.dataset(dataset_id).await?;
        let state = dataset.state.read().await;
        if state.cleared {
            return Err(SyncError::UnknownDataset(dataset_id.to_string()));
        }
        state.read(uid)
    }

    /// Replaces a record's payload locally
    pub async fn do_update(
        &self,
        dataset_id: &str,
        uid: &str,
        data: Value,
    ) -> SyncResult<ChangeReceipt> {
        self.mutate(dataset_id, |state| state.update(uid, data)).await
    }

    /// Deletes a record locally
    pub async fn do_delete(&self, dataset_id: &str, uid: &str) -> SyncResult<ChangeReceipt> {
        self.mutate(dataset_id, |state| state.delete(uid)).await
    }

    /// Snapshot of every local record, keyed by current identifier
    pub async fn do_list(&self, dataset_id: &str) -> SyncResult<BTreeMap<String, Record>> {
        let dataset = self.dataset(dataset_id).await?;
        let state = dataset.state.read().await;
        Ok(state.records.list())
    }

    /// Resumes automatic cycles, running one immediately
    pub async fn start_sync(&self, dataset_id: &str) -> SyncResult<()> {
        self.set_status(dataset_id, DatasetStatus::Active).await?;
        self.dataset(dataset_id).await?.send(LoopCommand::Wake);
        Ok(())
    }

    /// Pauses automatic cycles; local operations keep working
    pub async fn stop_sync(&self, dataset_id: &str) -> SyncResult<()> {
        self.set_status(dataset_id, DatasetStatus::Stopped).await
    }

    async fn set_status(&self, dataset_id: &str, status: DatasetStatus) -> SyncResult<()> {
        let dataset = self.dataset(dataset_id).await?;
        dataset.state.write().await.status = status;
        log::debug!("[{}] Status set to {:?}", dataset_id, status);
        Ok(())
    }

    /// Runs one cycle now and waits for it
    ///
    /// Returns [`CycleOutcome::Skipped`] if a cycle was already running.
    pub async fn force_sync(&self, dataset_id: &str) -> SyncResult<CycleOutcome> {
        let dataset = self.dataset(dataset_id).await?;
        Ok(dataset.run_cycle(&self.ctx).await)
    }

    /// Forgets a dataset and everything stored for it
    ///
    /// A cycle in flight finishes against the cleared state and its result is
    /// discarded.
    pub async fn clear_cache(&self, dataset_id: &str) -> SyncResult<()> {
        let dataset = self
            .datasets
            .write()
            .await
            .remove(dataset_id)
            .ok_or_else(|| SyncError::UnknownDataset(dataset_id.to_string()))?;

        dataset.state.write().await.clear();
        dataset.send(LoopCommand::Shutdown);
        self.ctx.store.remove(&storage_key(dataset_id)).await?;

        log::info!("[{}] Cache cleared", dataset_id);
        Ok(())
    }

    /// Pending entries keyed by hash
    pub async fn get_pending(&self, dataset_id: &str) -> SyncResult<BTreeMap<String, PendingEntry>> {
        let dataset = self.dataset(dataset_id).await?;
        let state = dataset.state.read().await;
        Ok(state.pending.snapshot())
    }

    /// Unresolved collisions keyed by the hash of the local change
    pub async fn list_collisions(&self, dataset_id: &str) -> SyncResult<BTreeMap<String, Collision>> {
        let dataset = self.dataset(dataset_id).await?;
        let state = dataset.state.read().await;
        Ok(state.collisions.list())
    }

    /// Discards a collision; returns it if it existed
    pub async fn remove_collision(
        &self,
        dataset_id: &str,
        hash: &str,
    ) -> SyncResult<Option<Collision>> {
        let dataset = self.dataset(dataset_id).await?;
        let mut state = dataset.state.write().await;
        let removed = state.collisions.remove(hash);
        if removed.is_some() {
            dataset.persist(self.ctx.store.as_ref(), &state).await?;
        }
        Ok(removed)
    }

    /// Registers a callback for every notification
    pub fn notify<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.ctx.bus.notify(observer)
    }

    /// Removes a callback registered with [`notify`](Self::notify)
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.ctx.bus.unsubscribe(id)
    }

    /// Receiver for notifications emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.bus.subscribe()
    }

    /// Current identity of a record created under `hash`
    ///
    /// `Remote(uid)` once the remote has acknowledged the create, otherwise
    /// `Local(hash)`.
    pub async fn get_uid(&self, hash: &str) -> RecordId {
        let datasets: Vec<Arc<Dataset>> = self.datasets.read().await.values().cloned().collect();
        for dataset in datasets {
            if let Some(uid) = dataset.state.read().await.uid_map.get(hash) {
                return RecordId::Remote(uid.clone());
            }
        }
        RecordId::Local(hash.to_string())
    }

    /// Signals whether the network is available
    ///
    /// While offline every cycle fails with `offline` without calling the
    /// remote.
    pub fn set_online(&self, online: bool) {
        let was = self.ctx.online.swap(online, Ordering::SeqCst);
        if was != online {
            log::info!("Network {}", if online { "online" } else { "offline" });
        }
    }

    /// Returns true unless [`set_online(false)`](Self::set_online) was called
    pub fn is_online(&self) -> bool {
        self.ctx.is_online()
    }

    /// Whether a dataset runs automatic cycles
    pub async fn status(&self, dataset_id: &str) -> SyncResult<DatasetStatus> {
        let dataset = self.dataset(dataset_id).await?;
        let status = dataset.state.read().await.status;
        Ok(status)
    }

    /// Where a dataset's cycle currently is
    pub async fn phase(&self, dataset_id: &str) -> SyncResult<CyclePhase> {
        Ok(self.dataset(dataset_id).await?.phase())
    }

    /// Ids of every managed dataset, sorted
    pub async fn managed_datasets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.datasets.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every loop, waiting for in-flight cycles to finish
    ///
    /// Datasets stay readable and writable; only automatic and forced
    /// reconciliation through the loops ends.
    pub async fn shutdown(&self) {
        let datasets: Vec<Arc<Dataset>> = self.datasets.read().await.values().cloned().collect();
        for dataset in datasets {
            dataset.shutdown().await;
        }
        log::info!("Sync manager shut down");
    }
}

impl Drop for DatasetManager {
    fn drop(&mut self) {
        for dataset in self.datasets.get_mut().values() {
            dataset.send(LoopCommand::Shutdown);
        }
    }
}

impl std::fmt::Debug for DatasetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetManager")
            .field("default_config", &self.default_config)
            .field("online", &self.is_online())
            .field("bus", &self.ctx.bus)
            .finish()
    }
}

// crates/sync-engine/src/sync_loop.rs
//! Per-dataset reconciliation loop
//!
//! Each managed dataset owns one tokio task that runs a cycle, then sleeps for
//! `sync_frequency` or until a [`LoopCommand`] arrives. A cycle walks
//! `Idle -> BuildingManifest -> AwaitingRemote -> ApplyingDelta -> Idle`, or
//! branches to `Failed` when the remote call does not succeed. At most one
//! cycle runs per dataset; a tick or forced sync arriving meanwhile is dropped.

use crate::dataset::{storage_key, DatasetState};
use crate::error::{RemoteError, SyncResult};
use crate::notify::{EventCode, NotificationBus, SyncEvent};
use crate::protocol::{ReconcileRequest, Remote};
use crate::types::{CycleOutcome, DatasetStatus};
use offsync_storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Where a dataset's cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CyclePhase {
    Idle,
    BuildingManifest,
    AwaitingRemote,
    ApplyingDelta,
    Failed,
}

impl CyclePhase {
    /// Returns true if no cycle is running
    pub fn is_idle(&self) -> bool {
        matches!(self, CyclePhase::Idle)
    }
}

/// Messages accepted by a running loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopCommand {
    /// Run a cycle now (if active) and restart the timer
    Wake,
    /// Restart the timer without running a cycle
    Reschedule,
    /// Exit after the current cycle
    Shutdown,
}

/// Collaborators shared by every dataset of a manager
pub(crate) struct SyncContext {
    pub remote: Arc<dyn Remote>,
    pub store: Arc<dyn KeyValueStore>,
    pub bus: Arc<NotificationBus>,
    pub online: AtomicBool,
}

impl SyncContext {
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// A managed dataset: its state, cycle guard and loop handle
pub(crate) struct Dataset {
    pub id: String,
    pub state: RwLock<DatasetState>,
    phase: Mutex<CyclePhase>,
    commands: mpsc::UnboundedSender<LoopCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dataset {
    /// Creates the dataset and starts its loop
    pub fn spawn(id: String, state: DatasetState, ctx: Arc<SyncContext>) -> Arc<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let dataset = Arc::new(Self {
            id,
            state: RwLock::new(state),
            phase: Mutex::new(CyclePhase::Idle),
            commands,
            task: Mutex::new(None),
        });

        let handle = tokio::spawn(run_loop(Arc::clone(&dataset), ctx, receiver));
        *lock(&dataset.task) = Some(handle);
        dataset
    }

    pub fn phase(&self) -> CyclePhase {
        *lock(&self.phase)
    }

    fn set_phase(&self, phase: CyclePhase) {
        *lock(&self.phase) = phase;
    }

    /// Claims the cycle slot; false if a cycle is already running
    fn try_begin(&self) -> bool {
        let mut phase = lock(&self.phase);
        if !phase.is_idle() {
            return false;
        }
        *phase = CyclePhase::BuildingManifest;
        true
    }

    pub fn send(&self, command: LoopCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("[{}] Loop already stopped, dropping {:?}", self.id, command);
        }
    }

    /// Stops the loop and waits for it to finish its current cycle
    pub async fn shutdown(&self) {
        self.send(LoopCommand::Shutdown);
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("[{}] Sync loop panicked: {}", self.id, e);
            }
        }
    }

    /// Writes the dataset snapshot unless the dataset has been cleared
    pub async fn persist(&self, store: &dyn KeyValueStore, state: &DatasetState) -> SyncResult<()> {
        if state.cleared {
            return Ok(());
        }
        let bytes = state.snapshot().to_bytes()?;
        store.set(&storage_key(&self.id), bytes).await?;
        Ok(())
    }

    /// Runs one cycle unless another is in progress
    pub async fn run_cycle(&self, ctx: &SyncContext) -> CycleOutcome {
        if !self.try_begin() {
            log::debug!("[{}] Cycle already running, skipping", self.id);
            return CycleOutcome::Skipped;
        }
        let outcome = self.cycle(ctx).await;
        self.set_phase(CyclePhase::Idle);
        outcome
    }

    async fn cycle(&self, ctx: &SyncContext) -> CycleOutcome {
        let (request, timeout, threshold) = {
            let mut state = self.state.write().await;
            if state.cleared {
                return CycleOutcome::Skipped;
            }

            ctx.bus.emit(SyncEvent::new(&self.id, EventCode::SyncStarted));

            let pending = state.pending.begin_cycle();
            let request = ReconcileRequest {
                dataset_id: self.id.clone(),
                manifest: state.records.manifest(),
                pending,
            };
            if let Err(e) = self.persist(ctx.store.as_ref(), &state).await {
                log::warn!("[{}] Failed to persist cycle start: {}", self.id, e);
            }
            (
                request,
                state.config.request_timeout,
                state.config.crashed_count_wait,
            )
        };

        log::debug!(
            "[{}] Sending {} records, {} pending changes",
            self.id,
            request.manifest.entries.len(),
            request.pending.len()
        );
        self.set_phase(CyclePhase::AwaitingRemote);

        let result = if !ctx.is_online() {
            Err(RemoteError::Offline)
        } else {
            match tokio::time::timeout(timeout, ctx.remote.reconcile(request)).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout),
            }
        };

        match result {
            Ok(response) => {
                self.set_phase(CyclePhase::ApplyingDelta);
                let events = {
                    let mut state = self.state.write().await;
                    if state.cleared {
                        log::info!("[{}] Dataset cleared during cycle, discarding response", self.id);
                        return CycleOutcome::Skipped;
                    }
                    let events = state.apply_response(&self.id, response);
                    if let Err(e) = self.persist(ctx.store.as_ref(), &state).await {
                        log::warn!("[{}] Failed to persist cycle result: {}", self.id, e);
                    }
                    events
                };

                for event in events {
                    ctx.bus.emit(event);
                }
                ctx.bus
                    .emit(SyncEvent::new(&self.id, EventCode::SyncComplete).with_text("online"));
                log::debug!("[{}] Cycle complete", self.id);
                CycleOutcome::Completed
            }
            Err(err) => {
                self.set_phase(CyclePhase::Failed);
                let code = err.code();
                {
                    let mut state = self.state.write().await;
                    if state.cleared {
                        return CycleOutcome::Skipped;
                    }
                    for hash in state.pending.record_failure(threshold) {
                        log::warn!("[{}] Pending change {} marked crashed", self.id, hash);
                    }
                    if let Err(e) = self.persist(ctx.store.as_ref(), &state).await {
                        log::warn!("[{}] Failed to persist cycle failure: {}", self.id, e);
                    }
                }

                log::warn!("[{}] Sync failed: {}", self.id, err);
                ctx.bus
                    .emit(SyncEvent::new(&self.id, EventCode::SyncFailed).with_text(code.clone()));
                CycleOutcome::Failed(code)
            }
        }
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_loop(
    dataset: Arc<Dataset>,
    ctx: Arc<SyncContext>,
    mut commands: mpsc::UnboundedReceiver<LoopCommand>,
) {
    log::debug!("[{}] Sync loop started", dataset.id);
    let mut run_now = true;

    loop {
        let (active, frequency) = {
            let state = dataset.state.read().await;
            if state.cleared {
                break;
            }
            (state.status == DatasetStatus::Active, state.config.sync_frequency)
        };

        if active && run_now {
            dataset.run_cycle(&ctx).await;
        }
        run_now = true;

        tokio::select! {
            _ = tokio::time::sleep(frequency) => {}
            command = commands.recv() => match command {
                Some(LoopCommand::Wake) => {}
                Some(LoopCommand::Reschedule) => run_now = false,
                Some(LoopCommand::Shutdown) | None => break,
            }
        }
    }

    log::debug!("[{}] Sync loop stopped", dataset.id);
}

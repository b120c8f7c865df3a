// crates/sync-engine/src/notify.rs
//! Lifecycle notifications
//!
//! Every dataset loop and every local mutation publishes a [`SyncEvent`] on
//! the manager's [`NotificationBus`]. Callback observers registered with
//! [`NotificationBus::notify`] run synchronously at emission time; async
//! consumers can instead hold a broadcast receiver from
//! [`NotificationBus::subscribe`].

use crate::types::Action;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Capacity of the broadcast channel; slow receivers see `Lagged`
const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCode {
    SyncStarted,
    SyncComplete,
    SyncFailed,
    LocalUpdateApplied,
    RemoteUpdateApplied,
    RecordDeltaReceived,
    CollisionDetected,
    OfflineUpdate,
}

impl EventCode {
    /// Wire name of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCode::SyncStarted => "sync_started",
            EventCode::SyncComplete => "sync_complete",
            EventCode::SyncFailed => "sync_failed",
            EventCode::LocalUpdateApplied => "local_update_applied",
            EventCode::RemoteUpdateApplied => "remote_update_applied",
            EventCode::RecordDeltaReceived => "record_delta_received",
            EventCode::CollisionDetected => "collision_detected",
            EventCode::OfflineUpdate => "offline_update",
        }
    }
}

impl std::fmt::Display for EventCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventMessage {
    /// `null`
    None,
    /// A bare string such as `"online"`, an action or a failure code
    Text(String),
    /// `{type: "applied", action, hash, uid}`
    Applied {
        #[serde(rename = "type")]
        kind: String,
        action: Action,
        hash: String,
        uid: String,
    },
    /// `{uid, hash}`
    Collision { uid: String, hash: String },
}

impl EventMessage {
    /// Builds an `applied` payload
    pub fn applied(action: Action, hash: impl Into<String>, uid: impl Into<String>) -> Self {
        EventMessage::Applied {
            kind: "applied".to_string(),
            action,
            hash: hash.into(),
            uid: uid.into(),
        }
    }

    /// Returns the text of a `Text` payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventMessage::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the action of an `Applied` payload
    pub fn action(&self) -> Option<Action> {
        match self {
            EventMessage::Applied { action, .. } => Some(*action),
            _ => None,
        }
    }
}

/// One lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub dataset_id: String,
    pub uid: Option<String>,
    pub code: EventCode,
    pub message: EventMessage,
}

impl SyncEvent {
    /// Creates an event with no record and no payload
    pub fn new(dataset_id: impl Into<String>, code: EventCode) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            uid: None,
            code,
            message: EventMessage::None,
        }
    }

    /// Attaches the record the event concerns
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Attaches a payload
    pub fn with_message(mut self, message: EventMessage) -> Self {
        self.message = message;
        self
    }

    /// Attaches a string payload
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_message(EventMessage::Text(text.into()))
    }
}

/// Handle returned by [`NotificationBus::notify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Multi-subscriber event emitter shared by every dataset
pub struct NotificationBus {
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    sender: broadcast::Sender<SyncEvent>,
    next_id: AtomicU64,
    console_log: AtomicBool,
}

impl NotificationBus {
    /// Creates a bus with no observers
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            observers: Mutex::new(Vec::new()),
            sender,
            next_id: AtomicU64::new(1),
            console_log: AtomicBool::new(false),
        }
    }

    /// Also logs every event at info level
    pub fn with_console_log(self, enabled: bool) -> Self {
        self.set_console_log(enabled);
        self
    }

    /// Switches info-level event logging on or off
    pub fn set_console_log(&self, enabled: bool) {
        self.console_log.store(enabled, Ordering::Relaxed);
    }

    /// Registers a callback invoked for every subsequent event
    pub fn notify<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(observer)));
        id
    }

    /// Removes a callback; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Returns a receiver for events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Number of registered callbacks
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .map(|observers| observers.len())
            .unwrap_or(0)
    }

    /// Delivers an event to every callback and receiver
    pub fn emit(&self, event: SyncEvent) {
        log::debug!(
            "[{}] {} uid={:?} message={:?}",
            event.dataset_id,
            event.code,
            event.uid,
            event.message
        );
        if self.console_log.load(Ordering::Relaxed) {
            log::info!("[{}] {} {:?}", event.dataset_id, event.code, event.message);
        }

        // Observers run outside the lock so they may (un)register themselves
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer(&event);
        }

        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("observers", &self.observer_count())
            .field("receivers", &self.sender.receiver_count())
            .field("console_log", &self.console_log.load(Ordering::Relaxed))
            .finish()
    }
}

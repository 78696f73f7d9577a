//! Sync event types and the broadcast EventBus
//!
//! Long-running sync runs publish their lifecycle here so that the HTTP surface
//! (or any other observer) can follow progress without polling the database.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Which dataset a sync run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    /// Ballots and their vote sets from the votes provider
    Ballots,
    /// Death dates from the knowledge graph
    DeathDates,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Ballots => "ballots",
            SyncKind::DeathDates => "death_dates",
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A run was started
    SyncStarted {
        run_id: Uuid,
        kind: SyncKind,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic progress of a running sync
    SyncProgress {
        run_id: Uuid,
        kind: SyncKind,
        /// Percentage complete (0 - 100)
        percentage: u8,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A run reached its terminal state
    SyncCompleted {
        run_id: Uuid,
        kind: SyncKind,
        success: bool,
        error_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SyncEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::SyncStarted { .. } => "SyncStarted",
            SyncEvent::SyncProgress { .. } => "SyncProgress",
            SyncEvent::SyncCompleted { .. } => "SyncCompleted",
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            SyncEvent::SyncStarted { run_id, .. }
            | SyncEvent::SyncProgress { run_id, .. }
            | SyncEvent::SyncCompleted { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast bus for [`SyncEvent`]s
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

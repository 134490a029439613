//! Orchestrator event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers (a progress view
//! attached mid-batch) can catch up on task state changes.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::ids::{ArtifactId, BatchId, TaskId};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventCategory
// ---------------------------------------------------------------------------

/// Which part of the orchestrator an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Per-task state changes.
    Task,
    /// Engine handle lifecycle.
    Engine,
    /// Batch and wave scheduling.
    Batch,
    /// Artifact and bundle lifecycle.
    Artifact,
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Task lifecycle ------------------------------------------------------
    TaskSubmitted {
        task_id: TaskId,
        name: String,
        size_bytes: u64,
    },
    TaskRejected {
        task_id: TaskId,
        reason: String,
    },
    TaskStarted {
        task_id: TaskId,
    },
    TaskProgress {
        task_id: TaskId,
        progress: u8,
    },
    TaskCompleted {
        task_id: TaskId,
        artifact_id: ArtifactId,
    },
    TaskFailed {
        task_id: TaskId,
        kind: ErrorKind,
        error: String,
    },
    TaskRemoved {
        task_id: TaskId,
    },

    // -- Engine lifecycle ----------------------------------------------------
    EngineLoaded,
    EngineLoadFailed {
        error: String,
    },

    // -- Batch scheduling ----------------------------------------------------
    BatchStarted {
        batch_id: BatchId,
        tasks: usize,
        waves: usize,
    },
    WaveStarted {
        batch_id: BatchId,
        index: usize,
        size: usize,
    },
    BatchFinished {
        batch_id: BatchId,
        completed: usize,
        failed: usize,
    },

    // -- Artifacts -----------------------------------------------------------
    ArtifactReleased {
        artifact_id: ArtifactId,
        task_id: TaskId,
    },
    BundleCreated {
        name: String,
        entries: usize,
        size_bytes: u64,
    },
}

impl EventPayload {
    /// The category this payload belongs to.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::TaskSubmitted { .. }
            | Self::TaskRejected { .. }
            | Self::TaskStarted { .. }
            | Self::TaskProgress { .. }
            | Self::TaskCompleted { .. }
            | Self::TaskFailed { .. }
            | Self::TaskRemoved { .. } => EventCategory::Task,
            Self::EngineLoaded | Self::EngineLoadFailed { .. } => EventCategory::Engine,
            Self::BatchStarted { .. } | Self::WaveStarted { .. } | Self::BatchFinished { .. } => {
                EventCategory::Batch
            }
            Self::ArtifactReleased { .. } | Self::BundleCreated { .. } => EventCategory::Artifact,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped, categorised event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Which component emitted it.
    pub category: EventCategory,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category: payload.category(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn publish(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish_non_exhaustive()
    }
}

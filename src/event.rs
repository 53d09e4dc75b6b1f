//! Structured events emitted by the dispatcher on every state transition.
//!
//! Collaborators subscribe to push status to clients instead of polling.
//! Delivery is best-effort: a lagging subscriber loses the oldest events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::model::{WorkId, WorkKind};

/// A structured event emitted by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    WorkQueued {
        id: WorkId,
        kind: WorkKind,
        owner_id: String,
        position: usize,
    },
    WorkProcessing {
        id: WorkId,
    },
    WorkCompleted {
        id: WorkId,
        duration_ms: u64,
    },
    WorkFailed {
        id: WorkId,
        error: String,
    },
    WorkPurged {
        id: WorkId,
    },
}

/// Sequenced fan-out of events.
pub(crate) struct EventStream {
    // Held across send so receivers see strictly increasing seq.
    seq: Mutex<u64>,
    tx: broadcast::Sender<Event>,
}

impl EventStream {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            seq: Mutex::new(0),
            tx,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        let mut seq = self.seq.lock().unwrap_or_else(|e| e.into_inner());
        *seq += 1;
        let event = Event {
            seq: *seq,
            timestamp: Utc::now(),
            kind,
        };
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

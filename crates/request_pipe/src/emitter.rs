use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::bucket::DuplicatePolicy;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipeEvent {
    Start {
        id: String,
        service: String,
    },

    Step {
        id: String,
        service: String,
        step: String,
    },

    Success {
        id: String,
        service: String,
        status: u16,
    },

    Failure {
        id: String,
        service: String,
        error: String,
    },

    /// Emitted when the bucket turns a call away or folds it into another.
    Duplicate {
        id: String,
        service: String,
        key: String,
        policy: DuplicatePolicy,
    },

    Cancelled {
        id: String,
        service: String,
        step: String,
    },
}

impl PipeEvent {
    pub fn id(&self) -> &str {
        match self {
            PipeEvent::Start { id, .. }
            | PipeEvent::Step { id, .. }
            | PipeEvent::Success { id, .. }
            | PipeEvent::Failure { id, .. }
            | PipeEvent::Duplicate { id, .. }
            | PipeEvent::Cancelled { id, .. } => id,
        }
    }
}

/// Fire-and-forget lifecycle notifications.
///
/// Emitting never blocks and never fails; with no subscribers the event is
/// dropped, and slow subscribers see `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct Emitter {
    sender: broadcast::Sender<PipeEvent>,
}

impl Emitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: PipeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipeEvent> {
        self.sender.subscribe()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

//! Domain event system: observable signals out of the conversation loops.
//!
//! Events are published when something interesting happens in a loop.
//! Telemetry, the CLI, and tests subscribe without coupling to the engine.
//! Background task failures travel here too, so they are never silent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cycle::ChatMode;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A cycle was sealed and appended to history
    CycleCompleted {
        stream_id: String,
        cycle_id: u64,
        action: String,
        taken: bool,
        elapsed: Duration,
        timestamp: DateTime<Utc>,
    },

    /// The loop switched between idle and engaged
    ModeChanged {
        stream_id: String,
        from: ChatMode,
        to: ChatMode,
        energy: f64,
        timestamp: DateTime<Utc>,
    },

    /// Silence exceeded the target interval and a proactive trigger fired
    ProactiveTriggered {
        stream_id: String,
        silence: Duration,
        target: Duration,
        timestamp: DateTime<Utc>,
    },

    /// Reply generation keeps timing out
    TimeoutWarning {
        stream_id: String,
        consecutive: u32,
        timestamp: DateTime<Utc>,
    },

    /// The driver faulted and is being restarted after a cooldown
    LoopRestarted {
        stream_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The energy tick or proactive check failed
    BackgroundTaskFailed {
        stream_id: String,
        task: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn stream_id(&self) -> &str {
        match self {
            DomainEvent::CycleCompleted { stream_id, .. }
            | DomainEvent::ModeChanged { stream_id, .. }
            | DomainEvent::ProactiveTriggered { stream_id, .. }
            | DomainEvent::TimeoutWarning { stream_id, .. }
            | DomainEvent::LoopRestarted { stream_id, .. }
            | DomainEvent::BackgroundTaskFailed { stream_id, .. } => stream_id,
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Cloning the bus
/// shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Observer fan-out
//!
//! Delivers session events to every connected observer. A failing observer is
//! pruned after the delivery round without affecting the others.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Outbound event, serialized with a `type` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Ordered list of selectable device identifiers
    Ports {
        /// Identifiers, `SIMULATOR` first
        data: Vec<String>,
    },
    /// Result of a lifecycle or configuration command
    Status {
        /// Whether the command succeeded
        success: bool,
        /// Connection state after the command
        connected: bool,
        /// Human-readable outcome
        msg: String,
    },
    /// Received bytes rendered as text or hex
    Rx {
        /// Rendered payload
        data: String,
    },
    /// A request failed
    Error {
        /// Cause
        msg: String,
    },
}

impl Event {
    /// Build a `status` event
    pub fn status(success: bool, connected: bool, msg: impl Into<String>) -> Self {
        Event::Status {
            success,
            connected,
            msg: msg.into(),
        }
    }

    /// Build an `error` event
    pub fn error(msg: impl Into<String>) -> Self {
        Event::Error { msg: msg.into() }
    }
}

/// Why a sink refused an event
#[derive(Error, Debug)]
pub enum SinkError {
    /// The consumer went away
    #[error("observer closed")]
    Closed,

    /// The consumer stopped draining its queue
    #[error("observer queue full")]
    Full,

    /// Transport-specific failure
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// A connected consumer of events.
///
/// `send` must not block: transports enqueue and return.
pub trait BroadcastSink: Send + Sync {
    /// Queue `event` for delivery
    fn send(&self, event: &Event) -> Result<(), SinkError>;

    /// True once the consumer is gone
    fn is_closed(&self) -> bool;
}

/// Bounded queue per observer. An observer that stops draining its queue
/// fills it and is pruned on the next delivery.
impl BroadcastSink for mpsc::Sender<Event> {
    fn send(&self, event: &Event) -> Result<(), SinkError> {
        self.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn is_closed(&self) -> bool {
        mpsc::Sender::is_closed(self)
    }
}

/// Events an observer may have queued before it counts as stalled
pub const DEFAULT_OBSERVER_QUEUE_DEPTH: usize = 1024;

/// Observer handle
pub type ObserverId = Uuid;

/// The observer set
pub struct Broadcaster {
    observers: Mutex<HashMap<ObserverId, Box<dyn BroadcastSink>>>,
    queue_depth: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::with_queue_depth(DEFAULT_OBSERVER_QUEUE_DEPTH)
    }
}

impl Broadcaster {
    /// Observer set with the default per-observer queue depth
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer set whose channels hold at most `depth` undelivered events
    pub fn with_queue_depth(depth: usize) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            queue_depth: depth.max(1),
        }
    }

    /// Per-observer queue depth used by [`Broadcaster::channel`]
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// A bounded observer channel sized for this broadcaster
    pub fn channel(&self) -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
        mpsc::channel(self.queue_depth)
    }

    fn observers(&self) -> std::sync::MutexGuard<'_, HashMap<ObserverId, Box<dyn BroadcastSink>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a sink and return its id
    pub fn add(&self, sink: Box<dyn BroadcastSink>) -> ObserverId {
        let id = Uuid::new_v4();
        self.observers().insert(id, sink);
        tracing::debug!(observer = %id, "observer added");
        id
    }

    /// Register a fresh bounded channel and hand back its receiving end
    pub fn subscribe(&self) -> (ObserverId, mpsc::Receiver<Event>) {
        let (tx, rx) = self.channel();
        (self.add(Box::new(tx)), rx)
    }

    /// Remove a sink; unknown ids are ignored
    pub fn remove(&self, id: &ObserverId) -> bool {
        let removed = self.observers().remove(id).is_some();
        if removed {
            tracing::debug!(observer = %id, "observer removed");
        }
        removed
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers().len()
    }

    /// Whether nobody is listening
    pub fn is_empty(&self) -> bool {
        self.observers().is_empty()
    }

    /// Deliver to every observer, pruning the ones that fail.
    ///
    /// Returns the number of observers that accepted the event.
    pub fn broadcast(&self, event: &Event) -> usize {
        let mut observers = self.observers();
        let mut failed = Vec::new();
        let mut delivered = 0;

        for (id, sink) in observers.iter() {
            if sink.is_closed() {
                failed.push(*id);
                continue;
            }
            match sink.send(event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(observer = %id, "broadcast send failed: {e}");
                    failed.push(*id);
                }
            }
        }

        for id in failed {
            observers.remove(&id);
            tracing::debug!(observer = %id, "pruned observer");
        }
        delivered
    }
}

//! Receive buffering
//!
//! Decouples the rate bytes arrive from the device from the rate they are
//! delivered to observers. Bytes accumulate in a capacity-bounded buffer and
//! are drained on a timer into payload-sized `rx` events.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::broadcast::{Broadcaster, Event};
use crate::format::RxDisplay;

/// Capacity-bounded byte buffer that evicts oldest bytes first
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl ReceiveBuffer {
    /// Empty buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    /// Append a chunk, discarding the oldest bytes if it would overflow.
    ///
    /// Returns the number of bytes evicted.
    pub fn append(&mut self, chunk: &[u8]) -> usize {
        // A chunk larger than the whole buffer only keeps its own tail
        let truncated = chunk.len().saturating_sub(self.capacity);
        let chunk = &chunk[truncated..];

        let overflow = (self.data.len() + chunk.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.data.drain(..overflow);
        }
        self.data.extend(chunk);
        overflow + truncated
    }

    /// Take everything, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<u8> {
        self.data.drain(..).collect()
    }

    /// Bytes held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing is held
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Ceiling in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the current contents, oldest first
    pub fn contents(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }
}

/// Split a drained snapshot into consecutive pieces of at most `max_payload` bytes
pub fn split_payload(snapshot: &[u8], max_payload: usize) -> std::slice::Chunks<'_, u8> {
    snapshot.chunks(max_payload.max(1))
}

struct FlushState {
    buffer: ReceiveBuffer,
    last_flush: Instant,
}

/// The receive buffer plus its flush timer, behind its own short-lived lock.
///
/// The lock is never held across device I/O or delivery.
pub struct RxPipeline {
    state: Mutex<FlushState>,
    max_payload: usize,
}

impl RxPipeline {
    /// Empty pipeline; the flush timer starts now
    pub fn new(capacity: usize, max_payload: usize) -> Self {
        Self {
            state: Mutex::new(FlushState {
                buffer: ReceiveBuffer::new(capacity),
                last_flush: Instant::now(),
            }),
            max_payload: max_payload.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FlushState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append freshly read bytes
    pub fn append(&self, chunk: &[u8]) {
        let evicted = self.lock().buffer.append(chunk);
        if evicted > 0 {
            tracing::debug!(evicted, "receive buffer full, dropped oldest bytes");
        }
    }

    /// Bytes waiting for the next flush
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Copy of the buffered bytes without draining
    pub fn buffered(&self) -> Vec<u8> {
        self.lock().buffer.contents()
    }

    /// Drain the buffer if the flush interval has elapsed (or `force` is set).
    ///
    /// Resets the timer whenever a drain is attempted. Returns `None` when
    /// nothing was due or the buffer was empty.
    pub fn take_due(&self, interval: Duration, force: bool) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let now = Instant::now();
        if !force && now.duration_since(state.last_flush) < interval {
            return None;
        }
        state.last_flush = now;
        if state.buffer.is_empty() {
            return None;
        }
        Some(state.buffer.drain())
    }

    /// Drain if due and deliver to observers. Returns the number of events emitted.
    ///
    /// With no observers the drained bytes are discarded.
    pub fn flush(
        &self,
        interval: Duration,
        force: bool,
        display: RxDisplay,
        broadcaster: &Broadcaster,
    ) -> usize {
        let Some(snapshot) = self.take_due(interval, force) else {
            return 0;
        };

        if broadcaster.is_empty() {
            tracing::trace!(bytes = snapshot.len(), "no observers, discarding received bytes");
            return 0;
        }

        let mut emitted = 0;
        for piece in split_payload(&snapshot, self.max_payload) {
            broadcaster.broadcast(&Event::Rx {
                data: display.render(piece),
            });
            emitted += 1;
        }
        tracing::trace!(bytes = snapshot.len(), events = emitted, "flushed receive buffer");
        emitted
    }
}

//! Paced transmit
//!
//! Writes an outbound byte sequence one byte at a time with a fixed delay
//! between bytes. Runs on the blocking pool so the caller isn't held up for
//! the length of the send.

use std::time::Duration;
use tokio::task::JoinHandle;

use crate::session::ChannelSlot;

/// How a paced send ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitOutcome {
    /// Every byte was written
    Completed,
    /// The session stopped or the channel went away mid-send
    Aborted,
    /// A write failed; bytes written before it stay written
    Failed(String),
}

/// Summary of one paced send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitReport {
    /// Bytes asked for
    pub requested: usize,
    /// Bytes actually written
    pub written: usize,
    /// How the send ended
    pub outcome: TransmitOutcome,
}

/// Handle to an in-flight send
pub struct TransmitHandle {
    inner: Option<JoinHandle<TransmitReport>>,
    requested: usize,
}

impl TransmitHandle {
    pub(crate) fn spawned(inner: JoinHandle<TransmitReport>, requested: usize) -> Self {
        Self {
            inner: Some(inner),
            requested,
        }
    }

    /// A send that finished synchronously (simulated echo)
    pub(crate) fn finished(requested: usize) -> Self {
        Self {
            inner: None,
            requested,
        }
    }

    /// Wait for the send to finish
    pub async fn wait(self) -> TransmitReport {
        match self.inner {
            Some(handle) => handle.await.unwrap_or_else(|e| TransmitReport {
                requested: self.requested,
                written: 0,
                outcome: TransmitOutcome::Failed(format!("transmit task ended abnormally: {e}")),
            }),
            None => TransmitReport {
                requested: self.requested,
                written: self.requested,
                outcome: TransmitOutcome::Completed,
            },
        }
    }
}

/// Write `bytes` through the channel slot one at a time, waiting `delay`
/// after every byte (the last one included) before the final flush.
///
/// Before each byte `keep_going` is consulted and the slot is checked for an
/// open channel; if either fails the remaining bytes are dropped silently.
/// The channel lock is released between bytes so the read loop can interleave.
pub fn pace_bytes(
    slot: &ChannelSlot,
    bytes: &[u8],
    delay: Duration,
    keep_going: impl Fn() -> bool,
) -> TransmitReport {
    let mut written = 0;
    let mut outcome = TransmitOutcome::Completed;

    for &byte in bytes {
        if !keep_going() {
            outcome = TransmitOutcome::Aborted;
            break;
        }

        let mut guard = slot.lock();
        let Some(channel) = guard.as_mut().filter(|c| c.is_open()) else {
            outcome = TransmitOutcome::Aborted;
            break;
        };
        if let Err(e) = channel.write_byte(byte) {
            tracing::warn!(written, "transmit write failed: {e}");
            outcome = TransmitOutcome::Failed(e.to_string());
            break;
        }
        drop(guard);
        written += 1;

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    // Best-effort: the channel may be gone already
    if let Some(channel) = slot.lock().as_mut().filter(|c| c.is_open()) {
        if let Err(e) = channel.flush() {
            tracing::debug!("flush after transmit failed: {e}");
        }
    }

    if outcome == TransmitOutcome::Aborted {
        tracing::debug!(written, requested = bytes.len(), "transmit aborted");
    }

    TransmitReport {
        requested: bytes.len(),
        written,
        outcome,
    }
}

//! Bridge configuration
//!
//! Tunables for the receive pipeline, transmit pacing and background loops.
//! Every field has a default so a partial JSON document is enough.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lower/upper bound for the runtime-adjustable flush interval (ms)
pub const FLUSH_INTERVAL_RANGE_MS: (u64, u64) = (10, 1000);

/// Lower/upper bound for the runtime-adjustable inter-byte delay (ms)
pub const TX_DELAY_RANGE_MS: (u64, u64) = (0, 100);

/// Tunables for the bridge. Every field is optional in the JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Receive buffer ceiling in bytes
    pub rx_buffer_capacity: usize,
    /// Largest single `rx` event payload in bytes
    pub max_payload_bytes: usize,
    /// Most bytes taken from the device per read
    pub read_chunk_bytes: usize,
    /// Initial receive flush interval
    pub flush_interval_ms: u64,
    /// Initial pause after each transmitted byte
    pub tx_delay_ms: u64,
    /// Sleep between read attempts
    pub read_poll_ms: u64,
    /// Sleep between checks while receive is paused
    pub paused_poll_ms: u64,
    /// How long disconnect waits for the read loop before moving on
    pub reader_join_timeout_ms: u64,
    /// Period of the port list poll
    pub port_poll_interval_ms: u64,
    /// Events an observer may have queued before it is treated as stalled and dropped
    pub observer_queue_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rx_buffer_capacity: 256 * 1024,
            max_payload_bytes: 4096,
            read_chunk_bytes: 4096,
            flush_interval_ms: 50,
            tx_delay_ms: 2,
            read_poll_ms: 10,
            paused_poll_ms: 100,
            reader_join_timeout_ms: 500,
            port_poll_interval_ms: 1000,
            observer_queue_depth: crate::broadcast::DEFAULT_OBSERVER_QUEUE_DEPTH,
        }
    }
}

impl BridgeConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse a JSON document and normalize it
    pub fn from_json(text: &str) -> Result<Self, std::io::Error> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(config.normalized())
    }

    /// Pull runtime-adjustable values into their allowed ranges
    pub fn normalized(mut self) -> Self {
        self.flush_interval_ms = clamp_flush_interval(self.flush_interval_ms);
        self.tx_delay_ms = clamp_tx_delay(self.tx_delay_ms);
        self.rx_buffer_capacity = self.rx_buffer_capacity.max(1);
        self.max_payload_bytes = self.max_payload_bytes.max(1);
        self.read_chunk_bytes = self.read_chunk_bytes.max(1);
        self.observer_queue_depth = self.observer_queue_depth.max(1);
        self
    }

    /// [`Self::read_poll_ms`] as a duration
    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    /// [`Self::paused_poll_ms`] as a duration
    pub fn paused_poll(&self) -> Duration {
        Duration::from_millis(self.paused_poll_ms)
    }

    /// [`Self::reader_join_timeout_ms`] as a duration
    pub fn reader_join_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_join_timeout_ms)
    }

    /// Port poll period, never zero
    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.port_poll_interval_ms.max(1))
    }
}

/// Pull a flush interval into [`FLUSH_INTERVAL_RANGE_MS`]
pub fn clamp_flush_interval(ms: u64) -> u64 {
    ms.clamp(FLUSH_INTERVAL_RANGE_MS.0, FLUSH_INTERVAL_RANGE_MS.1)
}

/// Pull a transmit delay into [`TX_DELAY_RANGE_MS`]
pub fn clamp_tx_delay(ms: u64) -> u64 {
    ms.clamp(TX_DELAY_RANGE_MS.0, TX_DELAY_RANGE_MS.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BridgeConfig::from_json(r#"{"max_payload_bytes": 512}"#).unwrap();
        assert_eq!(config.max_payload_bytes, 512);
        assert_eq!(config.rx_buffer_capacity, 256 * 1024);
        assert_eq!(config.flush_interval_ms, 50);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config =
            BridgeConfig::from_json(r#"{"flush_interval_ms": 1, "tx_delay_ms": 5000}"#).unwrap();
        assert_eq!(config.flush_interval_ms, 10);
        assert_eq!(config.tx_delay_ms, 100);
    }

    #[test]
    fn test_observer_queue_depth_has_floor() {
        let config = BridgeConfig::from_json(r#"{"observer_queue_depth": 0}"#).unwrap();
        assert_eq!(config.observer_queue_depth, 1);
        assert_eq!(BridgeConfig::default().observer_queue_depth, 1024);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(BridgeConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_clamps() {
        assert_eq!(clamp_flush_interval(0), 10);
        assert_eq!(clamp_flush_interval(2000), 1000);
        assert_eq!(clamp_flush_interval(200), 200);
        assert_eq!(clamp_tx_delay(101), 100);
        assert_eq!(clamp_tx_delay(0), 0);
    }
}

//! In-memory device backend shared by the integration tests

#![allow(dead_code)]

use serialbridge_core::broadcast::Event;
use serialbridge_core::config::BridgeConfig;
use serialbridge_core::device::{ByteChannel, DeviceBackend, DeviceError, LineSettings};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Default)]
pub struct DeviceState {
    /// Bytes the device has "received" and not yet handed out
    pub pending: Vec<u8>,
    pub written: Vec<u8>,
    pub written_at: Vec<Instant>,
    pub open: bool,
    pub fail_read: bool,
    /// Device disappears after this many bytes have been written
    pub vanish_after_writes: Option<usize>,
    pub opened: Vec<(String, LineSettings)>,
}

#[derive(Clone, Default)]
pub struct MockDevice(pub Arc<Mutex<DeviceState>>);

impl MockDevice {
    pub fn inject(&self, bytes: &[u8]) {
        self.0.lock().unwrap().pending.extend_from_slice(bytes);
    }

    pub fn pending_len(&self) -> usize {
        self.0.lock().unwrap().pending.len()
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().written.clone()
    }

    pub fn written_at(&self) -> Vec<Instant> {
        self.0.lock().unwrap().written_at.clone()
    }

    pub fn is_open(&self) -> bool {
        self.0.lock().unwrap().open
    }

    pub fn set_fail_read(&self, fail: bool) {
        self.0.lock().unwrap().fail_read = fail;
    }

    pub fn vanish_after_writes(&self, count: usize) {
        self.0.lock().unwrap().vanish_after_writes = Some(count);
    }
}

pub struct MockChannel {
    device: MockDevice,
}

impl ByteChannel for MockChannel {
    fn read_available(&mut self, max: usize) -> Result<Vec<u8>, DeviceError> {
        let mut state = self.device.0.lock().unwrap();
        if state.fail_read {
            return Err(DeviceError::SerialError("device unplugged".into()));
        }
        let take = state.pending.len().min(max);
        Ok(state.pending.drain(..take).collect())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), DeviceError> {
        let mut state = self.device.0.lock().unwrap();
        if !state.open {
            return Err(DeviceError::NotConnected);
        }
        state.written.push(byte);
        state.written_at.push(Instant::now());
        if Some(state.written.len()) == state.vanish_after_writes {
            state.open = false;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close(&mut self) {
        self.device.0.lock().unwrap().open = false;
    }

    fn is_open(&self) -> bool {
        self.device.0.lock().unwrap().open
    }
}

#[derive(Default)]
pub struct MockBackend {
    pub device: MockDevice,
    pub ports: Mutex<Vec<String>>,
    pub open_error: Mutex<Option<String>>,
}

impl MockBackend {
    pub fn with_ports(ports: &[&str]) -> Self {
        let backend = Self::default();
        backend.set_ports(ports);
        backend
    }

    pub fn set_ports(&self, ports: &[&str]) {
        *self.ports.lock().unwrap() = ports.iter().map(|p| p.to_string()).collect();
    }

    pub fn fail_open(&self, cause: &str) {
        *self.open_error.lock().unwrap() = Some(cause.to_string());
    }
}

impl DeviceBackend for MockBackend {
    fn open(
        &self,
        port: &str,
        settings: &LineSettings,
    ) -> Result<Box<dyn ByteChannel>, DeviceError> {
        if let Some(cause) = self.open_error.lock().unwrap().clone() {
            return Err(DeviceError::Busy(cause));
        }
        let mut state = self.device.0.lock().unwrap();
        state.open = true;
        state.opened.push((port.to_string(), *settings));
        drop(state);
        Ok(Box::new(MockChannel {
            device: self.device.clone(),
        }))
    }

    fn list_ports(&self) -> Result<Vec<String>, DeviceError> {
        Ok(self.ports.lock().unwrap().clone())
    }
}

/// Config with short timings so tests run quickly
pub fn fast_config() -> BridgeConfig {
    BridgeConfig {
        flush_interval_ms: 10,
        tx_delay_ms: 0,
        read_poll_ms: 1,
        paused_poll_ms: 5,
        reader_join_timeout_ms: 500,
        port_poll_interval_ms: 10,
        ..BridgeConfig::default()
    }
}

/// Poll `cond` until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}

/// Collect events until `pred` matches one or `timeout` elapses
pub async fn next_matching(
    events: &mut mpsc::Receiver<Event>,
    timeout: Duration,
    pred: impl Fn(&Event) -> bool,
) -> Option<Event> {
    tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Concatenate the text of every `rx` event currently queued
pub fn drain_rx_text(events: &mut mpsc::Receiver<Event>) -> String {
    let mut text = String::new();
    while let Ok(event) = events.try_recv() {
        if let Event::Rx { data } = event {
            text.push_str(&data);
        }
    }
    text
}

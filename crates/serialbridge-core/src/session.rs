//! Device session
//!
//! Owns the single active device binding: its lifecycle, the receive loop,
//! pause state and the runtime-adjustable flush interval and transmit delay.
//!
//! Two locks guard the data plane. The channel slot serializes every device
//! read and write (receive loop and transmit never touch the device at the same
//! instant). The receive buffer has its own short-lived lock inside
//! [`RxPipeline`]. Lifecycle operations are serialized by an async mutex so
//! connect and disconnect never overlap.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{Broadcaster, Event};
use crate::config::{clamp_flush_interval, clamp_tx_delay, BridgeConfig};
use crate::device::{ByteChannel, DeviceBackend, DeviceError, LineSettings, SIMULATOR_PORT};
use crate::format::{encode_hex_spaced, resolve_encoding, RxDisplay};
use crate::rx::RxPipeline;
use crate::tx::{pace_bytes, TransmitHandle};

/// Errors surfaced by session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// The device layer failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The operation needs a connection
    #[error("Not connected")]
    NotConnected,

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No device bound
    Disconnected,
    /// A connect is in progress
    Connecting,
    /// Bound to a hardware port
    ConnectedReal,
    /// Bound to the echo simulator
    ConnectedSimulated,
}

impl SessionState {
    /// Either connected variant
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::ConnectedReal | SessionState::ConnectedSimulated
        )
    }
}

/// The open channel, if any, behind the device I/O guard
pub struct ChannelSlot {
    inner: Mutex<Option<Box<dyn ByteChannel>>>,
}

impl ChannelSlot {
    /// Slot holding `channel`
    pub fn new(channel: Option<Box<dyn ByteChannel>>) -> Self {
        Self {
            inner: Mutex::new(channel),
        }
    }

    /// Take the I/O guard, recovering from poisoning
    pub fn lock(&self) -> MutexGuard<'_, Option<Box<dyn ByteChannel>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a channel is held
    pub fn is_occupied(&self) -> bool {
        self.lock().is_some()
    }

    /// Close and release the channel. Safe to call when empty.
    fn close(&self) {
        if let Some(mut channel) = self.lock().take() {
            channel.close();
        }
    }
}

/// State shared with the receive loop and transmit tasks
struct Shared {
    backend: Arc<dyn DeviceBackend>,
    broadcaster: Arc<Broadcaster>,
    config: BridgeConfig,
    channel: ChannelSlot,
    rx: RxPipeline,
    state: Mutex<SessionState>,
    /// Cancellation for the current connection only
    connection: Mutex<CancellationToken>,
    running: AtomicBool,
    paused: AtomicBool,
    display: Mutex<RxDisplay>,
    flush_interval_ms: AtomicU64,
    tx_delay_ms: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_token(&self) -> CancellationToken {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn display(&self) -> RxDisplay {
        *self.display.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.load(Ordering::Relaxed))
    }

    fn flush_rx(&self, force: bool) -> usize {
        self.rx
            .flush(self.flush_interval(), force, self.display(), &self.broadcaster)
    }

    /// Called by a read loop that hit a device error. Only tears down if the
    /// loop's connection is still the current one.
    fn fail_connection(&self, token: &CancellationToken, err: &DeviceError) {
        let mut slot = self.channel.lock();
        if token.is_cancelled() {
            return;
        }
        token.cancel();
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut channel) = slot.take() {
            channel.close();
        }
        drop(slot);

        self.set_state(SessionState::Disconnected);
        self.broadcaster.broadcast(&Event::status(
            false,
            false,
            format!("Device read failed: {err}"),
        ));
    }
}

/// Receive loop body; runs on the blocking pool for the life of one connection
fn read_loop(shared: Arc<Shared>, token: CancellationToken) {
    let poll = shared.config.read_poll();
    let paused_poll = shared.config.paused_poll();
    let chunk = shared.config.read_chunk_bytes;
    let mut failure = None;

    tracing::debug!("read loop started");
    loop {
        if token.is_cancelled() || !shared.running.load(Ordering::SeqCst) {
            break;
        }
        if shared.paused.load(Ordering::SeqCst) {
            // Leave pending bytes in the device's own buffer
            std::thread::sleep(paused_poll);
            continue;
        }

        let read = {
            let mut slot = shared.channel.lock();
            match slot.as_mut() {
                Some(channel) if channel.is_open() => channel.read_available(chunk),
                Some(_) => Err(DeviceError::SerialError("device closed".to_string())),
                None => break,
            }
        };
        match read {
            Ok(bytes) if !bytes.is_empty() => shared.rx.append(&bytes),
            Ok(_) => {}
            Err(e) => {
                tracing::error!("read loop error: {e}");
                failure = Some(e);
                break;
            }
        }

        shared.flush_rx(false);
        std::thread::sleep(poll);
    }

    // Don't lose whatever arrived since the last tick
    shared.flush_rx(true);

    if let Some(err) = failure {
        shared.fail_connection(&token, &err);
    }
    tracing::debug!("read loop exited");
}

#[derive(Default)]
struct Lifecycle {
    reader: Option<JoinHandle<()>>,
    port: Option<String>,
}

/// The single active device binding
pub struct Session {
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl Session {
    /// Disconnected session over `backend`, publishing through `broadcaster`
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        broadcaster: Arc<Broadcaster>,
        config: BridgeConfig,
    ) -> Self {
        let config = config.normalized();
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        Self {
            shared: Arc::new(Shared {
                backend,
                broadcaster,
                channel: ChannelSlot::new(None),
                rx: RxPipeline::new(config.rx_buffer_capacity, config.max_payload_bytes),
                state: Mutex::new(SessionState::Disconnected),
                connection: Mutex::new(cancelled),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                display: Mutex::new(RxDisplay::default()),
                flush_interval_ms: AtomicU64::new(config.flush_interval_ms),
                tx_delay_ms: AtomicU64::new(config.tx_delay_ms),
                config,
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
        }
    }

    /// Shared observer registry
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.shared.broadcaster
    }

    /// Device factory
    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.shared.backend
    }

    /// Normalized startup configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Connected to hardware or the simulator
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Whether receive is paused
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Whether a channel handle is currently held
    pub fn has_channel(&self) -> bool {
        self.shared.channel.is_occupied()
    }

    /// Bytes waiting in the receive buffer
    pub fn buffered_rx(&self) -> Vec<u8> {
        self.shared.rx.buffered()
    }

    /// Current render settings for received bytes
    pub fn rx_display(&self) -> RxDisplay {
        self.shared.display()
    }

    /// Current flush interval
    pub fn flush_interval_ms(&self) -> u64 {
        self.shared.flush_interval_ms.load(Ordering::Relaxed)
    }

    /// Current per-byte transmit delay
    pub fn tx_delay_ms(&self) -> u64 {
        self.shared.tx_delay_ms.load(Ordering::Relaxed)
    }

    /// Connect to `port`, tearing down any existing connection first.
    ///
    /// `SIMULATOR` selects the echo device. Returns a human-readable status message.
    pub async fn connect(
        &self,
        port: &str,
        settings: LineSettings,
    ) -> Result<String, SessionError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.teardown(&mut lifecycle).await;
        self.shared.paused.store(false, Ordering::SeqCst);

        if port == SIMULATOR_PORT {
            *self
                .shared
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
            self.shared.running.store(true, Ordering::SeqCst);
            self.shared.set_state(SessionState::ConnectedSimulated);
            lifecycle.port = Some(port.to_string());
            tracing::info!("simulator session started");
            return Ok("Simulator mode started".to_string());
        }

        self.shared.set_state(SessionState::Connecting);
        let backend = self.shared.backend.clone();
        let name = port.to_string();
        let opened = tokio::task::spawn_blocking(move || backend.open(&name, &settings)).await;

        let channel = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                self.shared.set_state(SessionState::Disconnected);
                tracing::warn!(port, "connect failed: {e}");
                return Err(e.into());
            }
            Err(e) => {
                self.shared.set_state(SessionState::Disconnected);
                return Err(SessionError::Task(e.to_string()));
            }
        };

        let token = CancellationToken::new();
        *self.shared.channel.lock() = Some(channel);
        *self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.set_state(SessionState::ConnectedReal);

        let shared = self.shared.clone();
        lifecycle.reader = Some(tokio::task::spawn_blocking(move || read_loop(shared, token)));
        lifecycle.port = Some(port.to_string());

        tracing::info!(port, settings = %settings.summary(), "connected");
        Ok(format!("Connected to {port}"))
    }

    /// Tear down the current connection, if any
    pub async fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.teardown(&mut lifecycle).await;
    }

    async fn teardown(&self, lifecycle: &mut Lifecycle) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.current_token().cancel();
        self.shared.channel.close();

        if let Some(reader) = lifecycle.reader.take() {
            match tokio::time::timeout(self.shared.config.reader_join_timeout(), reader).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("read loop ended abnormally: {e}"),
                Err(_) => tracing::warn!("read loop did not stop in time, detaching"),
            }
        }

        if let Some(port) = lifecycle.port.take() {
            tracing::info!(port = %port, "disconnected");
        }
        self.shared.set_state(SessionState::Disconnected);
    }

    /// Pause or resume receiving
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
        tracing::debug!(paused, "receive pause toggled");
    }

    /// Render received bytes as hex instead of text
    pub fn set_hex_display(&self, hex: bool) {
        self.shared
            .display
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hex = hex;
    }

    /// Set the text decoding for received bytes; `None` resets to UTF-8
    pub fn set_rx_encoding(&self, label: Option<&str>) {
        let encoding = resolve_encoding(label);
        self.shared
            .display
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .encoding = encoding;
    }

    /// Set the receive flush interval; returns the clamped value in ms
    pub fn set_flush_interval(&self, ms: u64) -> u64 {
        let ms = clamp_flush_interval(ms);
        self.shared.flush_interval_ms.store(ms, Ordering::Relaxed);
        ms
    }

    /// Set the inter-byte transmit delay; returns the clamped value in ms
    pub fn set_tx_delay(&self, ms: u64) -> u64 {
        let ms = clamp_tx_delay(ms);
        self.shared.tx_delay_ms.store(ms, Ordering::Relaxed);
        ms
    }

    /// Force a flush of the receive buffer now
    pub fn flush_rx(&self) -> usize {
        self.shared.flush_rx(true)
    }

    /// Transmit `bytes`.
    ///
    /// In simulated mode the bytes are echoed to observers immediately. On a
    /// real device they are paced out on the blocking pool; the returned handle
    /// can be awaited for the outcome but doesn't have to be.
    pub fn send(&self, bytes: Vec<u8>) -> Result<TransmitHandle, SessionError> {
        match self.state() {
            SessionState::ConnectedSimulated => {
                self.shared.broadcaster.broadcast(&Event::Rx {
                    data: format!("[SIM] Echo: {}", encode_hex_spaced(&bytes)),
                });
                Ok(TransmitHandle::finished(bytes.len()))
            }
            SessionState::ConnectedReal if self.shared.channel.is_occupied() => {
                let requested = bytes.len();
                let delay = Duration::from_millis(self.tx_delay_ms());
                let token = self.shared.current_token();
                let shared = self.shared.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    pace_bytes(&shared.channel, &bytes, delay, || {
                        !token.is_cancelled() && shared.running.load(Ordering::SeqCst)
                    })
                });
                Ok(TransmitHandle::spawned(handle, requested))
            }
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Available identifiers with the simulator entry first
    pub async fn ports(&self) -> Result<Vec<String>, SessionError> {
        let backend = self.shared.backend.clone();
        let ports = tokio::task::spawn_blocking(move || backend.list_ports())
            .await
            .map_err(|e| SessionError::Task(e.to_string()))??;
        Ok(crate::watcher::with_simulator(ports))
    }
}

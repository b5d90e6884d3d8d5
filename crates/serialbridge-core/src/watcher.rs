//! Port watcher
//!
//! Polls the backend for device identifiers and broadcasts the list only when
//! it differs from the last snapshot.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{Broadcaster, Event};
use crate::device::{DeviceBackend, SIMULATOR_PORT};

/// Prefix the synthetic simulator entry
pub fn with_simulator(ports: Vec<String>) -> Vec<String> {
    let mut all = Vec::with_capacity(ports.len() + 1);
    all.push(SIMULATOR_PORT.to_string());
    all.extend(ports);
    all
}

/// Change detector over ordered port lists
#[derive(Debug, Default)]
pub struct PortWatcher {
    snapshot: Vec<String>,
}

impl PortWatcher {
    /// Watcher with an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded list
    pub fn snapshot(&self) -> &[String] {
        &self.snapshot
    }

    /// Record a fresh listing. Returns the new list if it differs from the
    /// previous one (order matters).
    pub fn observe(&mut self, ports: Vec<String>) -> Option<Vec<String>> {
        if ports == self.snapshot {
            return None;
        }
        self.snapshot = ports;
        Some(self.snapshot.clone())
    }
}

/// Spawn the polling loop. It runs until `cancel` fires.
pub fn spawn_port_watcher(
    backend: Arc<dyn DeviceBackend>,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut watcher = PortWatcher::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let backend = backend.clone();
            let listed = tokio::task::spawn_blocking(move || backend.list_ports()).await;
            let ports = match listed {
                Ok(Ok(ports)) => ports,
                Ok(Err(e)) => {
                    tracing::warn!("port scan error: {e}");
                    continue;
                }
                Err(e) => {
                    tracing::warn!("port scan task failed: {e}");
                    continue;
                }
            };

            if let Some(changed) = watcher.observe(with_simulator(ports)) {
                tracing::debug!(ports = ?changed, "port list changed");
                broadcaster.broadcast(&Event::Ports { data: changed });
            }
        }
        tracing::debug!("port watcher stopped");
    })
}

//! Serial port handling
//!
//! Real-hardware backend built on the `serialport` crate.

use serialport::{ClearBuffer, SerialPort};
use std::collections::HashSet;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{ByteChannel, DeviceBackend, DeviceError, LineSettings, DEFAULT_READ_TIMEOUT_MS};

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial port names in a deterministic order.
///
/// The port watcher compares snapshots as ordered lists, so the order here must
/// not depend on hash iteration or enumeration timing.
pub fn list_port_names() -> Result<Vec<String>, DeviceError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names: Vec<String> = Vec::new();

    let ports =
        serialport::available_ports().map_err(|e| DeviceError::EnumerationFailed(e.to_string()))?;
    for info in ports {
        if is_hidden_port(&info.port_name) {
            continue;
        }
        if seen.insert(info.port_name.clone()) {
            names.push(info.port_name);
        }
    }

    // Linux-only: udev-less containers don't report ttyACM/ttyUSB through the API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    if seen.insert(full.clone()) {
                        names.push(full);
                    }
                }
            }
        }
    }

    names.sort_by_key(|name| port_sort_key(name));
    Ok(names)
}

/// On macOS only the /dev/cu.* (calling unit) nodes are useful; the matching
/// /dev/tty.* nodes block on open waiting for carrier detect.
fn is_hidden_port(name: &str) -> bool {
    cfg!(target_os = "macos") && name.starts_with("/dev/tty.")
}

/// Open a serial port with the given line settings
pub fn open_port(name: &str, settings: &LineSettings) -> Result<Box<dyn SerialPort>, DeviceError> {
    let parity = settings.to_serialport_parity()?;
    let stop_bits = settings.to_serialport_stop_bits()?;

    serialport::new(name, settings.baud_rate)
        .data_bits(settings.to_serialport_data_bits())
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(settings.to_serialport_flow_control())
        .timeout(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS))
        .open()
        .map_err(DeviceError::from)
}

/// Serial port wrapper implementing [`ByteChannel`]
pub struct SerialChannel {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialChannel {
    /// Wrap an already opened port
    pub fn new(name: impl Into<String>, port: Box<dyn SerialPort>) -> Self {
        Self {
            name: name.into(),
            port: Some(port),
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, DeviceError> {
        self.port.as_mut().ok_or(DeviceError::NotConnected)
    }
}

impl ByteChannel for SerialChannel {
    fn read_available(&mut self, max: usize) -> Result<Vec<u8>, DeviceError> {
        let port = self.port_mut()?;
        let pending = port.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending.min(max)];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), DeviceError> {
        self.port_mut()?.write_all(&[byte])?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.port_mut()?.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        // The device may already be gone; nothing here is worth failing over
        if let Some(port) = self.port.take() {
            if let Err(e) = port.clear(ClearBuffer::Input) {
                tracing::warn!(port = %self.name, "failed to reset input buffer: {e}");
            }
            if let Err(e) = port.clear(ClearBuffer::Output) {
                tracing::warn!(port = %self.name, "failed to reset output buffer: {e}");
            }
            drop(port);
            tracing::debug!(port = %self.name, "serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// [`DeviceBackend`] for real serial hardware
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl DeviceBackend for SerialBackend {
    fn open(
        &self,
        port: &str,
        settings: &LineSettings,
    ) -> Result<Box<dyn ByteChannel>, DeviceError> {
        let handle = open_port(port, settings)?;
        tracing::info!(port, settings = %settings.summary(), "serial port opened");
        Ok(Box::new(SerialChannel::new(port, handle)))
    }

    fn list_ports(&self) -> Result<Vec<String>, DeviceError> {
        list_port_names()
    }
}

use super::{DeviceError, LineSettings};

/// An open byte-oriented device.
///
/// Every call is short: `read_available` returns whatever is pending (possibly
/// nothing) and must not block longer than the device's poll timeout.
pub trait ByteChannel: Send {
    /// Read all bytes currently pending, up to `max` bytes
    fn read_available(&mut self, max: usize) -> Result<Vec<u8>, DeviceError>;

    /// Write a single byte
    fn write_byte(&mut self, byte: u8) -> Result<(), DeviceError>;

    /// Flush pending output
    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Reset buffers and close. Idempotent and best-effort.
    fn close(&mut self);

    /// Whether the channel is still open
    fn is_open(&self) -> bool;
}

/// Opens channels and enumerates the identifiers that can be opened
pub trait DeviceBackend: Send + Sync {
    /// Open the named device with the given line parameters
    fn open(&self, port: &str, settings: &LineSettings)
        -> Result<Box<dyn ByteChannel>, DeviceError>;

    /// List the identifiers of the devices currently present, in platform order
    fn list_ports(&self) -> Result<Vec<String>, DeviceError>;
}

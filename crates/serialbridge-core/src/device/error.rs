//! Device errors

use thiserror::Error;

/// Errors raised at the hardware / virtual-device boundary
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Any other failure reported by the serial driver
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The named device doesn't exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// The process may not open the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Another process holds the device
    #[error("Port busy: {0}")]
    Busy(String),

    /// A line parameter the backend cannot program
    #[error("Unsupported line setting: {0}")]
    UnsupportedSetting(String),

    /// No channel is open
    #[error("Not connected")]
    NotConnected,

    /// Listing ports failed
    #[error("Port enumeration failed: {0}")]
    EnumerationFailed(String),

    /// I/O failure on an open channel
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for DeviceError {
    fn from(err: serialport::Error) -> Self {
        use serialport::ErrorKind;

        match err.kind() {
            ErrorKind::NoDevice => DeviceError::PortNotFound(err.description),
            ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                DeviceError::PortNotFound(err.description)
            }
            ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                DeviceError::PermissionDenied(err.description)
            }
            ErrorKind::Io(std::io::ErrorKind::WouldBlock)
            | ErrorKind::Io(std::io::ErrorKind::AddrInUse) => DeviceError::Busy(err.description),
            _ => DeviceError::SerialError(err.description),
        }
    }
}

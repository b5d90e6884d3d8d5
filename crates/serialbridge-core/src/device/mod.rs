//! Device access
//!
//! The byte channel abstraction over a serial port, the backend that opens
//! channels and enumerates ports, and the line parameters used to open them.

mod channel;
mod error;
pub mod serial;
mod settings;

pub use channel::{ByteChannel, DeviceBackend};
pub use error::DeviceError;
pub use serial::{list_port_names, open_port, SerialBackend, SerialChannel};
pub use settings::{ByteSize, FlowControl, LineSettings, Parity, StopBits};

/// Identifier that selects the simulated echo device instead of hardware
pub const SIMULATOR_PORT: &str = "SIMULATOR";

/// Default baud rate when a client doesn't specify one
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Read timeout programmed into real ports, in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

//! # SerialBridge Core Library
//!
//! Data plane for bridging a byte-oriented serial device to live observers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A byte channel abstraction over serial ports (and a simulated echo device)
//! - Capacity-bounded receive buffering with timed, payload-sized flushes
//! - Paced, cancellable byte-at-a-time transmit
//! - The connect / disconnect / pause session state machine
//! - Fan-out of events to observers, pruning broken ones
//! - Port list change detection
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serialbridge_core::prelude::*;
//!
//! let broadcaster = Arc::new(Broadcaster::new());
//! let session = Arc::new(Session::new(
//!     Arc::new(SerialBackend),
//!     broadcaster.clone(),
//!     BridgeConfig::default(),
//! ));
//!
//! let (_id, mut events) = broadcaster.subscribe();
//! session.connect("/dev/ttyUSB0", LineSettings::default()).await?;
//! session.send(b"AT\r\n".to_vec())?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod format;
pub mod rx;
pub mod session;
pub mod tx;
pub mod watcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::broadcast::{BroadcastSink, Broadcaster, Event, ObserverId, SinkError};
    pub use crate::config::BridgeConfig;
    pub use crate::device::{
        ByteChannel, DeviceBackend, DeviceError, LineSettings, SerialBackend, SIMULATOR_PORT,
    };
    pub use crate::dispatch::{Command, CommandError, Dispatcher};
    pub use crate::session::{Session, SessionError, SessionState};
    pub use crate::tx::{TransmitOutcome, TransmitReport};
    pub use crate::watcher::{spawn_port_watcher, PortWatcher};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Command dispatch
//!
//! Inbound observer commands as a tagged enum, and the one place each variant
//! is turned into session operations and a reply.

use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::broadcast::Event;
use crate::device::{ByteSize, FlowControl, LineSettings, Parity, StopBits};
use crate::format::hex_input_to_bytes;
use crate::session::Session;
use crate::tx::TransmitOutcome;

/// A number that may arrive as a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    /// Integral JSON number
    Int(i64),
    /// Fractional JSON number
    Float(f64),
    /// Number inside a string, parsed on use
    Text(String),
}

impl Numeric {
    /// Finite numeric value, if there is one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Numeric::Int(v) => Some(*v as f64),
            Numeric::Float(v) if v.is_finite() => Some(*v),
            Numeric::Float(_) => None,
            Numeric::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    /// Non-negative integer value, truncating fractions
    pub fn as_u64(&self) -> Option<u64> {
        self.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)
    }

    /// Millisecond value for a setting that gets clamped afterwards.
    /// Negative numbers saturate to 0 instead of being rejected.
    pub fn as_millis(&self) -> Option<u64> {
        self.as_f64().map(|v| v.max(0.0) as u64)
    }
}

/// Keeps "field present but null" distinct from "field absent"
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Observer → session command, tagged by `cmd`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Open a port, replacing any current connection
    Connect {
        /// Device path or `SIMULATOR`
        port: String,
        /// Baud rate
        #[serde(default)]
        baud: Option<Numeric>,
        /// Data bits
        #[serde(default)]
        bytesize: Option<Numeric>,
        /// Parity label
        #[serde(default)]
        parity: Option<String>,
        /// Stop bit count
        #[serde(default)]
        stopbits: Option<Numeric>,
        /// Flow control label
        #[serde(default)]
        flow_control: Option<String>,
    },
    /// Close the current connection
    Disconnect,
    /// Change how received bytes are rendered
    UpdateConfig {
        /// Hex rendering on or off
        #[serde(rename = "isHexShow", default)]
        is_hex_show: Option<bool>,
        /// Text encoding label; `null` resets to UTF-8
        #[serde(rename = "rxEncoding", default, deserialize_with = "present")]
        rx_encoding: Option<Option<String>>,
    },
    /// Stop or resume reading from the device
    PauseRx {
        /// Whether to pause
        #[serde(default)]
        paused: bool,
    },
    /// Change the receive flush interval
    SetRxInterval {
        /// Milliseconds
        interval: Numeric,
    },
    /// Change the pause after each transmitted byte
    SetTxDelay {
        /// Milliseconds
        delay: Numeric,
    },
    /// Transmit a payload
    Send {
        /// Text, or hex digits when `is_hex` is set
        data: String,
        /// Treat `data` as hex
        #[serde(rename = "isHex", default)]
        is_hex: bool,
    },
}

/// Problems with an inbound request
#[derive(Error, Debug)]
pub enum CommandError {
    /// Not JSON, or not a known command
    #[error("Invalid message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A numeric field that couldn't be used
    #[error("Invalid {field}: {value}")]
    InvalidNumber {
        /// Which field
        field: &'static str,
        /// What was sent
        value: String,
    },

    /// A send payload that couldn't be encoded
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl Command {
    /// Decode one text frame
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Build line settings from the loose connect fields. Unrecognized values
/// fall back to their defaults; only the baud rate is mandatory.
pub fn line_settings_from_request(
    baud: Option<&Numeric>,
    bytesize: Option<&Numeric>,
    parity: Option<&str>,
    stopbits: Option<&Numeric>,
    flow_control: Option<&str>,
) -> Result<LineSettings, CommandError> {
    let baud_rate = baud
        .and_then(Numeric::as_u64)
        .filter(|b| *b > 0 && *b <= u32::MAX as u64)
        .ok_or_else(|| CommandError::InvalidNumber {
            field: "baud rate",
            value: format!("{baud:?}"),
        })? as u32;

    Ok(LineSettings {
        baud_rate,
        byte_size: bytesize
            .and_then(Numeric::as_f64)
            .map(|b| ByteSize::from_bits(b as i64))
            .unwrap_or_default(),
        parity: parity.map(Parity::from_label).unwrap_or_default(),
        stop_bits: stopbits
            .and_then(Numeric::as_f64)
            .map(StopBits::from_count)
            .unwrap_or_default(),
        flow_control: flow_control.map(FlowControl::from_label).unwrap_or_default(),
    })
}

/// Encode a send request into bytes
pub fn payload_bytes(data: &str, is_hex: bool) -> Result<Vec<u8>, CommandError> {
    if is_hex {
        hex_input_to_bytes(data).map_err(|e| CommandError::InvalidPayload(e.to_string()))
    } else {
        Ok(data.as_bytes().to_vec())
    }
}

/// Queue a reply for one observer. A full or closed queue drops it; the
/// broadcaster prunes that observer on its next delivery.
fn respond(reply: &mpsc::Sender<Event>, event: Event) {
    if let Err(e) = reply.try_send(event) {
        tracing::debug!("reply dropped: {e}");
    }
}

/// Maps commands onto the session and replies to the requesting observer
#[derive(Clone)]
pub struct Dispatcher {
    session: Arc<Session>,
}

impl Dispatcher {
    /// Dispatcher driving `session`
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The session commands act on
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Parse and handle one text frame. Malformed frames are answered with an error.
    pub async fn handle_text(&self, text: &str, reply: &mpsc::Sender<Event>) {
        match Command::parse(text) {
            Ok(command) => self.handle(command, reply).await,
            Err(e) => {
                tracing::warn!("rejected client message: {e}");
                respond(reply, Event::error(e.to_string()));
            }
        }
    }

    /// Handle one command. Replies go to `reply` only, never to other observers.
    pub async fn handle(&self, command: Command, reply: &mpsc::Sender<Event>) {
        let session = &self.session;
        let response = match command {
            Command::Connect {
                port,
                baud,
                bytesize,
                parity,
                stopbits,
                flow_control,
            } => {
                match line_settings_from_request(
                    baud.as_ref(),
                    bytesize.as_ref(),
                    parity.as_deref(),
                    stopbits.as_ref(),
                    flow_control.as_deref(),
                ) {
                    Ok(settings) => match session.connect(&port, settings).await {
                        Ok(msg) => Some(Event::status(true, true, msg)),
                        Err(e) => Some(Event::status(false, false, e.to_string())),
                    },
                    Err(e) => Some(Event::status(false, session.is_connected(), e.to_string())),
                }
            }
            Command::Disconnect => {
                session.disconnect().await;
                Some(Event::status(true, false, "Disconnected"))
            }
            Command::UpdateConfig {
                is_hex_show,
                rx_encoding,
            } => {
                if let Some(hex) = is_hex_show {
                    session.set_hex_display(hex);
                }
                if let Some(label) = rx_encoding {
                    session.set_rx_encoding(label.as_deref());
                }
                None
            }
            Command::PauseRx { paused } => {
                session.set_paused(paused);
                let msg = if paused {
                    "Receive paused"
                } else {
                    "Receive resumed"
                };
                Some(Event::status(true, session.is_connected(), msg))
            }
            Command::SetRxInterval { interval } => match interval.as_millis() {
                Some(ms) => {
                    let ms = session.set_flush_interval(ms);
                    Some(Event::status(
                        true,
                        session.is_connected(),
                        format!("Receive flush interval set to {ms} ms"),
                    ))
                }
                None => Some(Event::status(
                    false,
                    session.is_connected(),
                    format!("Invalid interval: {interval:?}"),
                )),
            },
            Command::SetTxDelay { delay } => match delay.as_millis() {
                Some(ms) => {
                    let ms = session.set_tx_delay(ms);
                    Some(Event::status(
                        true,
                        session.is_connected(),
                        format!("Transmit delay set to {ms} ms"),
                    ))
                }
                None => Some(Event::status(
                    false,
                    session.is_connected(),
                    format!("Invalid delay: {delay:?}"),
                )),
            },
            Command::Send { data, is_hex } => self.send(&data, is_hex, reply),
        };

        if let Some(event) = response {
            respond(reply, event);
        }
    }

    fn send(&self, data: &str, is_hex: bool, reply: &mpsc::Sender<Event>) -> Option<Event> {
        let bytes = match payload_bytes(data, is_hex) {
            Ok(bytes) => bytes,
            Err(e) => return Some(Event::error(format!("Send failed: {e}"))),
        };
        if bytes.is_empty() {
            return None;
        }

        match self.session.send(bytes) {
            Ok(handle) => {
                let reply = reply.clone();
                tokio::spawn(async move {
                    let report = handle.wait().await;
                    if let TransmitOutcome::Failed(cause) = report.outcome {
                        respond(
                            &reply,
                            Event::error(format!(
                                "Send failed after {} of {} bytes: {cause}",
                                report.written, report.requested
                            )),
                        );
                    }
                });
                None
            }
            Err(e) => Some(Event::error(format!("Send failed: {e}"))),
        }
    }
}

//! Line parameters
//!
//! Our own view of byte size, parity, stop bits and flow control, with lenient
//! parsing from the loose values clients send and conversion onto the
//! `serialport` crate's types.

use serde::{Deserialize, Serialize};

use super::{DeviceError, DEFAULT_BAUD_RATE};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteSize {
    /// 5 data bits
    Five,
    /// 6 data bits
    Six,
    /// 7 data bits
    Seven,
    /// 8 data bits
    #[default]
    Eight,
}

impl ByteSize {
    /// Map a bit count onto a byte size; anything unrecognized is 8 bits
    pub fn from_bits(bits: i64) -> Self {
        match bits {
            5 => ByteSize::Five,
            6 => ByteSize::Six,
            7 => ByteSize::Seven,
            _ => ByteSize::Eight,
        }
    }

    /// Bit count
    pub fn bits(self) -> u8 {
        match self {
            ByteSize::Five => 5,
            ByteSize::Six => 6,
            ByteSize::Seven => 7,
            ByteSize::Eight => 8,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
    /// Parity bit always 1
    Mark,
    /// Parity bit always 0
    Space,
}

impl Parity {
    /// Parse a client-supplied label ("None", "Even", ...); unrecognized is `None`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "even" => Parity::Even,
            "odd" => Parity::Odd,
            "mark" => Parity::Mark,
            "space" => Parity::Space,
            _ => Parity::None,
        }
    }
}

/// Stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    /// 1 stop bit
    #[default]
    One,
    /// 1.5 stop bits
    OnePointFive,
    /// 2 stop bits
    Two,
}

impl StopBits {
    /// Map a numeric stop bit count; unrecognized is 1
    pub fn from_count(count: f64) -> Self {
        if count == 1.5 {
            StopBits::OnePointFive
        } else if count == 2.0 {
            StopBits::Two
        } else {
            StopBits::One
        }
    }
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowControl {
    /// No flow control
    #[default]
    None,
    /// Software (XON/XOFF)
    XonXoff,
    /// Hardware (RTS/CTS)
    RtsCts,
}

impl FlowControl {
    /// Parse a client-supplied label ("None", "XON/XOFF", "RTS/CTS"); unrecognized is `None`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "XON/XOFF" | "XONXOFF" | "SOFTWARE" => FlowControl::XonXoff,
            "RTS/CTS" | "RTSCTS" | "HARDWARE" => FlowControl::RtsCts,
            _ => FlowControl::None,
        }
    }
}

/// Full set of line parameters for opening a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub byte_size: ByteSize,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits per character
    pub stop_bits: StopBits,
    /// Flow control mode
    pub flow_control: FlowControl,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            byte_size: ByteSize::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
        }
    }
}

impl LineSettings {
    /// Short "8N1"-style summary for log lines
    pub fn summary(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        format!("{} {}{}{}", self.baud_rate, self.byte_size.bits(), parity, stop)
    }

    pub(crate) fn to_serialport_data_bits(self) -> serialport::DataBits {
        match self.byte_size {
            ByteSize::Five => serialport::DataBits::Five,
            ByteSize::Six => serialport::DataBits::Six,
            ByteSize::Seven => serialport::DataBits::Seven,
            ByteSize::Eight => serialport::DataBits::Eight,
        }
    }

    /// The serialport backend has no mark/space parity
    pub(crate) fn to_serialport_parity(self) -> Result<serialport::Parity, DeviceError> {
        match self.parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Mark => Err(DeviceError::UnsupportedSetting("mark parity".to_string())),
            Parity::Space => Err(DeviceError::UnsupportedSetting("space parity".to_string())),
        }
    }

    /// The serialport backend has no 1.5 stop bits
    pub(crate) fn to_serialport_stop_bits(self) -> Result<serialport::StopBits, DeviceError> {
        match self.stop_bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => {
                Err(DeviceError::UnsupportedSetting("1.5 stop bits".to_string()))
            }
        }
    }

    pub(crate) fn to_serialport_flow_control(self) -> serialport::FlowControl {
        match self.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::XonXoff => serialport::FlowControl::Software,
            FlowControl::RtsCts => serialport::FlowControl::Hardware,
        }
    }
}

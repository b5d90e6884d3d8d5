//! Byte formatting
//!
//! Hex rendering and parsing, hex-input sanitization for sends, and text
//! decoding of received bytes with a named character encoding.

use encoding_rs::{Encoding, UTF_8};

/// Render bytes as space-separated lowercase hex pairs ("0a ff 41")
pub fn encode_hex_spaced(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, chunk) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&hex::encode([*chunk]));
    }
    out
}

/// Parse hex pairs, ignoring any whitespace between them
pub fn decode_hex_spaced(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact)
}

/// Drop every character outside `[0-9a-fA-F]` and pad an odd-length result
/// with a trailing `0` so it decodes to whole bytes.
pub fn sanitize_hex(input: &str) -> String {
    let mut digits: String = input.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if digits.len() % 2 != 0 {
        digits.push('0');
    }
    digits
}

/// Turn a client hex request into bytes. Malformed input is normalized, never rejected.
pub fn hex_input_to_bytes(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(sanitize_hex(input))
}

/// Look up an encoding by WHATWG label, falling back to UTF-8
pub fn resolve_encoding(label: Option<&str>) -> &'static Encoding {
    match label.map(str::trim).filter(|l| !l.is_empty()) {
        Some(label) => Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            tracing::warn!(label, "unknown receive encoding, using utf-8");
            UTF_8
        }),
        None => UTF_8,
    }
}

/// How received bytes are rendered into `rx` events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxDisplay {
    /// Render as space-separated hex pairs instead of text
    pub hex: bool,
    /// Decoding used in text mode
    pub encoding: &'static Encoding,
}

impl Default for RxDisplay {
    fn default() -> Self {
        Self {
            hex: false,
            encoding: UTF_8,
        }
    }
}

impl RxDisplay {
    /// Render one chunk. Undecodable sequences become U+FFFD; this never fails.
    pub fn render(&self, bytes: &[u8]) -> String {
        if self.hex {
            encode_hex_spaced(bytes)
        } else {
            let (text, _had_errors) = self.encoding.decode_without_bom_handling(bytes);
            text.into_owned()
        }
    }
}

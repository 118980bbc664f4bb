/// Text Codec Module
///
/// Converts between native string bytes and canonical (Rust `String`) text.
/// The codec is picked once per connection from the `utf8` option and then
/// threaded through commands and cursors.

use crate::core::{Result, SqlBridgeError};
use std::borrow::Cow;

/// Strategy for turning native strings into canonical text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextCodec {
    /// Hand native bytes over as they are; invalid sequences become U+FFFD.
    #[default]
    Native,
    /// Insist on well-formed UTF-8; anything else is a decoding error.
    Utf8,
}

impl TextCodec {
    /// Codec selected by the `utf8` connection option.
    pub fn from_utf8_flag(utf8: bool) -> Self {
        if utf8 {
            TextCodec::Utf8
        } else {
            TextCodec::Native
        }
    }

    pub fn is_utf8(self) -> bool {
        self == TextCodec::Utf8
    }

    /// Canonical text to native bytes.
    pub fn encode(self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    /// Native bytes to canonical text, taking ownership to avoid a copy
    /// when the bytes are already valid.
    pub fn decode(self, native: Vec<u8>) -> Result<String> {
        match String::from_utf8(native) {
            Ok(text) => Ok(text),
            Err(err) => match self {
                TextCodec::Native => Ok(String::from_utf8_lossy(err.as_bytes()).into_owned()),
                TextCodec::Utf8 => Err(decoding_error(err.utf8_error(), err.as_bytes())),
            },
        }
    }

    /// Borrowing variant of [`decode`](Self::decode).
    pub fn decode_bytes(self, native: &[u8]) -> Result<Cow<'_, str>> {
        match std::str::from_utf8(native) {
            Ok(text) => Ok(Cow::Borrowed(text)),
            Err(err) => match self {
                TextCodec::Native => Ok(String::from_utf8_lossy(native)),
                TextCodec::Utf8 => Err(decoding_error(err, native)),
            },
        }
    }
}

fn decoding_error(err: std::str::Utf8Error, bytes: &[u8]) -> SqlBridgeError {
    let at = err.valid_up_to();
    SqlBridgeError::Decoding(format!(
        "invalid UTF-8 at byte {} of {} (0x{:02x})",
        at,
        bytes.len(),
        bytes.get(at).copied().unwrap_or_default()
    ))
}

//! PackStream, the self-describing binary value encoding used by Bolt.
//!
//! The format carries null, booleans, variable-width integers, 64-bit
//! floats, UTF-8 strings, byte arrays, lists, string-keyed dictionaries
//! and tagged structures. Encoders always pick the smallest size class
//! for a value; dictionary entry order is preserved on the wire but has
//! no meaning.

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod types;

pub use decoder::{unpack, Unpacker};
pub use encoder::{pack, Packer};
pub use types::{PackValue, Structure};

use std::fmt;

/// Errors raised while encoding or decoding PackStream data.
#[derive(Debug, Clone)]
pub enum PackError {
    /// Input ended in the middle of a value.
    UnexpectedEnd,
    /// Marker byte that no PackStream version defines.
    UnknownMarker(u8),
    /// String payload was not valid UTF-8.
    InvalidUtf8(String),
    /// Dictionary key decoded to a non-string value.
    InvalidMapKey(&'static str),
    /// Value exceeds the widest available size class.
    TooLarge(&'static str, usize),
    /// Structure did not have the expected shape.
    InvalidStructure(String),
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::UnexpectedEnd => write!(f, "unexpected end of PackStream data"),
            PackError::UnknownMarker(m) => write!(f, "unknown PackStream marker 0x{:02X}", m),
            PackError::InvalidUtf8(e) => write!(f, "invalid UTF-8 in string: {}", e),
            PackError::InvalidMapKey(t) => write!(f, "map key must be a string, got {}", t),
            PackError::TooLarge(kind, n) => write!(f, "{} of size {} cannot be encoded", kind, n),
            PackError::InvalidStructure(msg) => write!(f, "invalid structure: {}", msg),
        }
    }
}

impl std::error::Error for PackError {}

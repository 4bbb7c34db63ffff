//! Wire-level errors.

use std::io;

use thiserror::Error;

use super::packstream::PackError;

/// Result alias for wire-level operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Errors raised below the driver API: framing, serialization, handshake
/// and socket faults.
#[derive(Debug, Error)]
pub enum BoltError {
    /// Socket read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// PackStream data could not be encoded or decoded.
    #[error("packstream error: {0}")]
    PackStream(#[from] PackError),

    /// The peer violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A reassembled message exceeded the configured cap.
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge {
        /// Observed size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

impl BoltError {
    /// Shorthand for a protocol violation.
    pub fn protocol(msg: impl Into<String>) -> Self {
        BoltError::Protocol(msg.into())
    }
}

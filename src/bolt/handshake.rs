//! Handshake and protocol version negotiation.
//!
//! A new connection opens with four magic bytes followed by four version
//! proposals, highest preference first, zero-filled when fewer than four
//! are offered. The server answers with the single version it accepts,
//! or all zeroes when none of the proposals suit it.

use std::fmt;

/// Magic preamble identifying the Bolt protocol.
pub const MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the client handshake: magic plus four version slots.
pub const HANDSHAKE_LEN: usize = 20;

/// Size of the server's handshake reply.
pub const HANDSHAKE_REPLY_LEN: usize = 4;

/// Protocol versions this driver speaks.
///
/// Encoded as a `u32` with the major version in the high 16 bits and the
/// minor version in the low 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum BoltVersion {
    /// Bolt 3.0: PULL_ALL/DISCARD_ALL, one stream per connection, no qid.
    V3_0 = 0x0003_0000,
    /// Bolt 4.0: PULL/DISCARD take `{n, qid}`, `has_more` streaming.
    V4_0 = 0x0004_0000,
    /// Bolt 4.1: HELLO may carry routing context.
    V4_1 = 0x0004_0001,
    /// Bolt 4.3: ROUTE message for cluster discovery.
    V4_3 = 0x0004_0003,
    /// Bolt 4.4: ROUTE takes the database name, richer tx metadata.
    V4_4 = 0x0004_0004,
}

/// Versions offered during the handshake, highest preference first.
pub const PROPOSED_VERSIONS: [BoltVersion; 4] = [
    BoltVersion::V4_4,
    BoltVersion::V4_3,
    BoltVersion::V4_1,
    BoltVersion::V3_0,
];

impl BoltVersion {
    /// Parse a raw `u32` version word.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0x0003_0000 => Some(BoltVersion::V3_0),
            0x0004_0000 => Some(BoltVersion::V4_0),
            0x0004_0001 => Some(BoltVersion::V4_1),
            0x0004_0003 => Some(BoltVersion::V4_3),
            0x0004_0004 => Some(BoltVersion::V4_4),
            _ => None,
        }
    }

    /// Raw version word.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Major version.
    pub fn major(self) -> u16 {
        (self.as_u32() >> 16) as u16
    }

    /// Minor version.
    pub fn minor(self) -> u16 {
        (self.as_u32() & 0xFFFF) as u16
    }

    /// Big-endian wire form.
    pub fn to_bytes(self) -> [u8; 4] {
        self.as_u32().to_be_bytes()
    }

    /// Parse the big-endian wire form.
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::from_u32(u32::from_be_bytes(bytes))
    }

    /// PULL/DISCARD take a demand map with `n` and `qid`.
    pub fn supports_qid(self) -> bool {
        self.major() >= 4
    }

    /// HELLO may include a routing context.
    pub fn supports_hello_routing(self) -> bool {
        self >= BoltVersion::V4_1
    }

    /// The ROUTE message is available for cluster discovery.
    pub fn supports_route_message(self) -> bool {
        self >= BoltVersion::V4_3
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Build the 20-byte client handshake.
pub fn build_handshake() -> [u8; HANDSHAKE_LEN] {
    let mut buf = [0u8; HANDSHAKE_LEN];
    buf[..4].copy_from_slice(&MAGIC);
    for (slot, version) in PROPOSED_VERSIONS.iter().enumerate() {
        let offset = 4 + slot * 4;
        buf[offset..offset + 4].copy_from_slice(&version.to_bytes());
    }
    buf
}

/// Interpret the server's 4-byte reply.
///
/// `Ok(None)` means the server rejected every proposal; the connection
/// must be treated as defunct.
pub fn parse_handshake_reply(reply: [u8; HANDSHAKE_REPLY_LEN]) -> Result<Option<BoltVersion>, u32> {
    let raw = u32::from_be_bytes(reply);
    if raw == 0 {
        return Ok(None);
    }
    match BoltVersion::from_u32(raw) {
        Some(v) => Ok(Some(v)),
        None => Err(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes() {
        assert_eq!(MAGIC, [0x60, 0x60, 0xB0, 0x17]);
    }

    #[test]
    fn handshake_layout() {
        let buf = build_handshake();
        assert_eq!(buf.len(), HANDSHAKE_LEN);
        assert_eq!(&buf[..4], &MAGIC);
        assert_eq!(&buf[4..8], &BoltVersion::V4_4.to_bytes());
        assert_eq!(&buf[8..12], &BoltVersion::V4_3.to_bytes());
        assert_eq!(&buf[12..16], &BoltVersion::V4_1.to_bytes());
        assert_eq!(&buf[16..20], &BoltVersion::V3_0.to_bytes());
    }

    #[test]
    fn version_words() {
        assert_eq!(BoltVersion::V4_3.as_u32(), 0x0004_0003);
        assert_eq!(BoltVersion::V4_3.major(), 4);
        assert_eq!(BoltVersion::V4_3.minor(), 3);
        assert_eq!(BoltVersion::V3_0.major(), 3);
        assert_eq!(BoltVersion::from_u32(0x0005_0000), None);
        assert_eq!(
            BoltVersion::from_bytes([0x00, 0x04, 0x00, 0x04]),
            Some(BoltVersion::V4_4)
        );
    }

    #[test]
    fn reply_parsing() {
        assert_eq!(parse_handshake_reply([0, 0, 0, 0]), Ok(None));
        assert_eq!(
            parse_handshake_reply([0x00, 0x04, 0x00, 0x03]),
            Ok(Some(BoltVersion::V4_3))
        );
        assert_eq!(
            parse_handshake_reply([0x00, 0x09, 0x00, 0x00]),
            Err(0x0009_0000)
        );
    }

    #[test]
    fn capability_gates() {
        assert!(!BoltVersion::V3_0.supports_qid());
        assert!(BoltVersion::V4_0.supports_qid());
        assert!(!BoltVersion::V4_0.supports_hello_routing());
        assert!(BoltVersion::V4_1.supports_hello_routing());
        assert!(!BoltVersion::V4_1.supports_route_message());
        assert!(BoltVersion::V4_3.supports_route_message());
        assert!(BoltVersion::V4_4.supports_route_message());
    }

    #[test]
    fn ordering_follows_version_numbers() {
        assert!(BoltVersion::V3_0 < BoltVersion::V4_0);
        assert!(BoltVersion::V4_1 < BoltVersion::V4_3);
        assert!(BoltVersion::V4_3 < BoltVersion::V4_4);
    }
}

//! Chunked message framing.
//!
//! A logical Bolt message is split into chunks, each prefixed with a
//! big-endian `u16` payload length, and terminated by a zero-length
//! chunk. The first zero-length chunk after one or more non-empty chunks
//! is exactly the message boundary. A bare zero-length chunk is a NOOP
//! keep-alive and is skipped.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::packstream::{pack, unpack, PackValue};
use super::BoltError;

/// Largest chunk payload emitted by the encoder.
pub const MAX_CHUNK_PAYLOAD: usize = 0xFFFF;

/// Default cap on a reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Message boundary marker.
const END_OF_MESSAGE: [u8; 2] = [0x00, 0x00];

/// Codec carrying PackStream values over chunked framing.
#[derive(Debug)]
pub struct ChunkCodec {
    max_message_size: usize,
    assembly: BytesMut,
}

impl ChunkCodec {
    /// Codec with the default message size cap.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Codec with a custom message size cap.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            assembly: BytesMut::with_capacity(4096),
        }
    }

    fn write_chunked(&self, payload: &[u8], dst: &mut BytesMut) {
        dst.reserve(payload.len() + (payload.len() / MAX_CHUNK_PAYLOAD + 1) * 2 + 2);
        for chunk in payload.chunks(MAX_CHUNK_PAYLOAD) {
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        dst.put_slice(&END_OF_MESSAGE);
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkCodec {
    type Item = PackValue;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }

            let header = u16::from_be_bytes([src[0], src[1]]) as usize;

            if header == 0 {
                src.advance(2);
                if self.assembly.is_empty() {
                    // NOOP keep-alive between messages.
                    continue;
                }
                let payload = self.assembly.split();
                let value = unpack(&payload)?;
                return Ok(Some(value));
            }

            if src.len() < 2 + header {
                return Ok(None);
            }

            if self.assembly.len() + header > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: self.assembly.len() + header,
                    max: self.max_message_size,
                });
            }

            src.advance(2);
            self.assembly.extend_from_slice(&src[..header]);
            src.advance(header);
        }
    }
}

impl Encoder<PackValue> for ChunkCodec {
    type Error = BoltError;

    fn encode(&mut self, item: PackValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = pack(&item)?;
        self.write_chunked(&payload, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_single_message() {
        let mut codec = ChunkCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(PackValue::String("over the wire".into()), &mut buf)
            .unwrap();
        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value.as_str(), Some("over the wire"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn message_larger_than_one_chunk() {
        let mut codec = ChunkCodec::new();
        let mut buf = BytesMut::new();

        let text = "z".repeat(MAX_CHUNK_PAYLOAD * 2 + 57);
        codec
            .encode(PackValue::String(text.clone()), &mut buf)
            .unwrap();

        // payload spans at least three chunks plus the end marker
        assert!(buf.len() > text.len() + 6);

        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value.as_str(), Some(text.as_str()));
    }

    #[test]
    fn partial_input_yields_none() {
        let mut codec = ChunkCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(PackValue::Integer(42), &mut buf).unwrap();

        let full = buf.clone();

        let mut partial = BytesMut::from(&full[..1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut partial = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut complete = full;
        assert_eq!(
            codec.decode(&mut complete).unwrap().unwrap().as_int(),
            Some(42)
        );
    }

    #[test]
    fn noop_chunks_are_skipped() {
        let mut codec = ChunkCodec::new();
        let mut buf = BytesMut::new();

        buf.put_slice(&END_OF_MESSAGE);
        buf.put_slice(&END_OF_MESSAGE);
        codec.encode(PackValue::Boolean(true), &mut buf).unwrap();

        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value.as_bool(), Some(true));
    }

    #[test]
    fn multiple_messages_in_one_buffer() {
        let mut codec = ChunkCodec::new();
        let mut buf = BytesMut::new();
        for i in 1..=3 {
            codec.encode(PackValue::Integer(i), &mut buf).unwrap();
        }
        for i in 1..=3 {
            assert_eq!(
                codec.decode(&mut buf).unwrap().unwrap().as_int(),
                Some(i)
            );
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut codec = ChunkCodec::with_max_message_size(64);
        let mut buf = BytesMut::new();
        buf.put_u16(100);
        buf.put_slice(&[0u8; 100]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(BoltError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn message_split_across_chunks_decodes() {
        // hand-build a two-chunk message carrying the string "ab"
        let mut codec = ChunkCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u8(0x82); // tiny string, length 2
        buf.put_u16(2);
        buf.put_slice(b"ab");
        buf.put_slice(&END_OF_MESSAGE);

        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value.as_str(), Some("ab"));
    }
}

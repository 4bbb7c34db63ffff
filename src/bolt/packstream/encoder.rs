//! PackStream encoding.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use super::marker;
use super::types::{PackValue, Structure};
use super::PackError;

/// Streaming encoder writing PackStream values into a growable buffer.
pub struct Packer {
    out: BytesMut,
}

impl Packer {
    /// New encoder with a small default buffer.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// New encoder with a pre-sized buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.out
    }

    /// Consume the encoder, yielding the encoded bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.out
    }

    /// Encode one value.
    pub fn pack(&mut self, value: &PackValue) -> Result<(), PackError> {
        match value {
            PackValue::Null => {
                self.out.put_u8(marker::NULL);
                Ok(())
            }
            PackValue::Boolean(b) => {
                self.out
                    .put_u8(if *b { marker::TRUE } else { marker::FALSE });
                Ok(())
            }
            PackValue::Integer(i) => {
                self.pack_int(*i);
                Ok(())
            }
            PackValue::Float(f) => {
                self.out.put_u8(marker::FLOAT64);
                self.out.put_f64(*f);
                Ok(())
            }
            PackValue::Bytes(b) => self.pack_bytes(b),
            PackValue::String(s) => self.pack_str(s),
            PackValue::List(l) => self.pack_list(l),
            PackValue::Map(m) => self.pack_map(m),
            PackValue::Structure(s) => self.pack_structure(s),
        }
    }

    /// Encode an integer in its smallest representation.
    pub fn pack_int(&mut self, value: i64) {
        if marker::fits_tiny_int(value) {
            self.out.put_u8(value as i8 as u8);
        } else if i8::try_from(value).is_ok() {
            self.out.put_u8(marker::INT8);
            self.out.put_i8(value as i8);
        } else if i16::try_from(value).is_ok() {
            self.out.put_u8(marker::INT16);
            self.out.put_i16(value as i16);
        } else if i32::try_from(value).is_ok() {
            self.out.put_u8(marker::INT32);
            self.out.put_i32(value as i32);
        } else {
            self.out.put_u8(marker::INT64);
            self.out.put_i64(value);
        }
    }

    /// Encode a byte array.
    pub fn pack_bytes(&mut self, value: &[u8]) -> Result<(), PackError> {
        match value.len() {
            n if n <= u8::MAX as usize => {
                self.out.put_u8(marker::BYTES8);
                self.out.put_u8(n as u8);
            }
            n if n <= u16::MAX as usize => {
                self.out.put_u8(marker::BYTES16);
                self.out.put_u16(n as u16);
            }
            n if n <= u32::MAX as usize => {
                self.out.put_u8(marker::BYTES32);
                self.out.put_u32(n as u32);
            }
            n => return Err(PackError::TooLarge("bytes", n)),
        }
        self.out.put_slice(value);
        Ok(())
    }

    /// Encode a string, picking the smallest size class.
    pub fn pack_str(&mut self, value: &str) -> Result<(), PackError> {
        let bytes = value.as_bytes();
        match bytes.len() {
            n if n <= marker::TINY_SIZE_MAX => {
                self.out.put_u8(marker::TINY_STRING | n as u8);
            }
            n if n <= u8::MAX as usize => {
                self.out.put_u8(marker::STRING8);
                self.out.put_u8(n as u8);
            }
            n if n <= u16::MAX as usize => {
                self.out.put_u8(marker::STRING16);
                self.out.put_u16(n as u16);
            }
            n if n <= u32::MAX as usize => {
                self.out.put_u8(marker::STRING32);
                self.out.put_u32(n as u32);
            }
            n => return Err(PackError::TooLarge("string", n)),
        }
        self.out.put_slice(bytes);
        Ok(())
    }

    /// Encode a list header plus its items.
    pub fn pack_list(&mut self, items: &[PackValue]) -> Result<(), PackError> {
        match items.len() {
            n if n <= marker::TINY_SIZE_MAX => {
                self.out.put_u8(marker::TINY_LIST | n as u8);
            }
            n if n <= u8::MAX as usize => {
                self.out.put_u8(marker::LIST8);
                self.out.put_u8(n as u8);
            }
            n if n <= u16::MAX as usize => {
                self.out.put_u8(marker::LIST16);
                self.out.put_u16(n as u16);
            }
            n if n <= u32::MAX as usize => {
                self.out.put_u8(marker::LIST32);
                self.out.put_u32(n as u32);
            }
            n => return Err(PackError::TooLarge("list", n)),
        }
        for item in items {
            self.pack(item)?;
        }
        Ok(())
    }

    /// Encode a map header plus its entries.
    pub fn pack_map(&mut self, map: &HashMap<String, PackValue>) -> Result<(), PackError> {
        match map.len() {
            n if n <= marker::TINY_SIZE_MAX => {
                self.out.put_u8(marker::TINY_MAP | n as u8);
            }
            n if n <= u8::MAX as usize => {
                self.out.put_u8(marker::MAP8);
                self.out.put_u8(n as u8);
            }
            n if n <= u16::MAX as usize => {
                self.out.put_u8(marker::MAP16);
                self.out.put_u16(n as u16);
            }
            n if n <= u32::MAX as usize => {
                self.out.put_u8(marker::MAP32);
                self.out.put_u32(n as u32);
            }
            n => return Err(PackError::TooLarge("map", n)),
        }
        for (key, value) in map {
            self.pack_str(key)?;
            self.pack(value)?;
        }
        Ok(())
    }

    /// Encode a structure header, its tag, then its fields.
    pub fn pack_structure(&mut self, s: &Structure) -> Result<(), PackError> {
        match s.fields.len() {
            n if n <= marker::TINY_SIZE_MAX => {
                self.out.put_u8(marker::TINY_STRUCT | n as u8);
            }
            n if n <= u8::MAX as usize => {
                self.out.put_u8(marker::STRUCT8);
                self.out.put_u8(n as u8);
            }
            n if n <= u16::MAX as usize => {
                self.out.put_u8(marker::STRUCT16);
                self.out.put_u16(n as u16);
            }
            n => return Err(PackError::TooLarge("structure", n)),
        }
        self.out.put_u8(s.tag);
        for field in &s.fields {
            self.pack(field)?;
        }
        Ok(())
    }
}

impl Default for Packer {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a single value into fresh bytes.
pub fn pack(value: &PackValue) -> Result<BytesMut, PackError> {
    let mut packer = Packer::new();
    packer.pack(value)?;
    Ok(packer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(value: &PackValue) -> Vec<u8> {
        pack(value).unwrap().to_vec()
    }

    #[test]
    fn null_and_bool() {
        assert_eq!(packed(&PackValue::Null), [0xC0]);
        assert_eq!(packed(&PackValue::Boolean(true)), [0xC3]);
        assert_eq!(packed(&PackValue::Boolean(false)), [0xC2]);
    }

    #[test]
    fn integers_use_smallest_class() {
        assert_eq!(packed(&PackValue::Integer(0)), [0x00]);
        assert_eq!(packed(&PackValue::Integer(127)), [0x7F]);
        assert_eq!(packed(&PackValue::Integer(-1)), [0xFF]);
        assert_eq!(packed(&PackValue::Integer(-16)), [0xF0]);
        assert_eq!(packed(&PackValue::Integer(-17)), [0xC8, 0xEF]);
        assert_eq!(packed(&PackValue::Integer(-128)), [0xC8, 0x80]);
        assert_eq!(packed(&PackValue::Integer(1000)), [0xC9, 0x03, 0xE8]);
        assert_eq!(
            packed(&PackValue::Integer(100_000)),
            [0xCA, 0x00, 0x01, 0x86, 0xA0]
        );
        let big = packed(&PackValue::Integer(i64::MAX));
        assert_eq!(big[0], 0xCB);
        assert_eq!(big.len(), 9);
    }

    #[test]
    fn float_is_always_wide() {
        let bytes = packed(&PackValue::Float(1.25));
        assert_eq!(bytes[0], 0xC1);
        assert_eq!(bytes.len(), 9);
        assert_eq!(f64::from_be_bytes(bytes[1..].try_into().unwrap()), 1.25);
    }

    #[test]
    fn strings() {
        assert_eq!(packed(&PackValue::String("".into())), [0x80]);
        let hello = packed(&PackValue::String("hello".into()));
        assert_eq!(hello[0], 0x85);
        assert_eq!(&hello[1..], b"hello");

        let long = "a".repeat(20);
        let bytes = packed(&PackValue::String(long));
        assert_eq!(bytes[0], marker::STRING8);
        assert_eq!(bytes[1], 20);
    }

    #[test]
    fn string_16_boundary() {
        let s = "b".repeat(300);
        let bytes = packed(&PackValue::String(s));
        assert_eq!(bytes[0], marker::STRING16);
        assert_eq!(u16::from_be_bytes([bytes[1], bytes[2]]), 300);
    }

    #[test]
    fn byte_arrays() {
        assert_eq!(packed(&PackValue::Bytes(vec![1, 2, 3])), [0xCC, 3, 1, 2, 3]);
    }

    #[test]
    fn lists() {
        assert_eq!(packed(&PackValue::List(vec![])), [0x90]);
        let bytes = packed(&PackValue::List(vec![
            PackValue::Integer(1),
            PackValue::Integer(2),
            PackValue::Integer(3),
        ]));
        assert_eq!(bytes, [0x93, 1, 2, 3]);
    }

    #[test]
    fn maps() {
        assert_eq!(packed(&PackValue::Map(HashMap::new())), [0xA0]);
        let mut m = HashMap::new();
        m.insert("a".to_string(), PackValue::Integer(1));
        let bytes = packed(&PackValue::Map(m));
        assert_eq!(bytes, [0xA1, 0x81, b'a', 1]);
    }

    #[test]
    fn structures() {
        let s = Structure::new(0x4E, vec![PackValue::Integer(1)]);
        let bytes = packed(&PackValue::Structure(s));
        assert_eq!(bytes, [0xB1, 0x4E, 1]);
    }

    #[test]
    fn nested_values() {
        let mut inner = HashMap::new();
        inner.insert("x".to_string(), PackValue::Integer(5));
        let value = PackValue::List(vec![PackValue::Map(inner)]);
        let bytes = packed(&value);
        assert_eq!(bytes, [0x91, 0xA1, 0x81, b'x', 0x05]);
    }
}

//! Wire-level PackStream values.

use std::collections::HashMap;

/// A value as it appears on the wire.
///
/// Everything the protocol transports is one of these shapes. Graph and
/// temporal types ride inside [`Structure`] and are interpreted one layer
/// up, by the driver's value mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum PackValue {
    /// Absence of a value.
    Null,
    /// Boolean.
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Float(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    List(Vec<PackValue>),
    /// String-keyed dictionary. Entry order is preserved on the wire but
    /// carries no meaning.
    Map(HashMap<String, PackValue>),
    /// Tagged structure.
    Structure(Structure),
}

/// A PackStream structure: a tag byte plus a fixed list of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    /// Signature byte identifying the structure kind.
    pub tag: u8,
    /// Field values in declaration order.
    pub fields: Vec<PackValue>,
}

impl Structure {
    /// Build a structure from a tag and its fields.
    pub fn new(tag: u8, fields: Vec<PackValue>) -> Self {
        Self { tag, fields }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the structure carries no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrow field `i`, if present.
    pub fn field(&self, i: usize) -> Option<&PackValue> {
        self.fields.get(i)
    }
}

impl PackValue {
    /// True for [`PackValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, PackValue::Null)
    }

    /// Read as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PackValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Read as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PackValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Read as a float. Integers widen losslessly enough for metadata use.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PackValue::Float(f) => Some(*f),
            PackValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PackValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as raw bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PackValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow as a list slice.
    pub fn as_list(&self) -> Option<&[PackValue]> {
        match self {
            PackValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Borrow as a map.
    pub fn as_map(&self) -> Option<&HashMap<String, PackValue>> {
        match self {
            PackValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow as a structure.
    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            PackValue::Structure(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the wire type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PackValue::Null => "Null",
            PackValue::Boolean(_) => "Boolean",
            PackValue::Integer(_) => "Integer",
            PackValue::Float(_) => "Float",
            PackValue::Bytes(_) => "Bytes",
            PackValue::String(_) => "String",
            PackValue::List(_) => "List",
            PackValue::Map(_) => "Map",
            PackValue::Structure(_) => "Structure",
        }
    }
}

impl From<bool> for PackValue {
    fn from(v: bool) -> Self {
        PackValue::Boolean(v)
    }
}

impl From<i64> for PackValue {
    fn from(v: i64) -> Self {
        PackValue::Integer(v)
    }
}

impl From<i32> for PackValue {
    fn from(v: i32) -> Self {
        PackValue::Integer(v as i64)
    }
}

impl From<f64> for PackValue {
    fn from(v: f64) -> Self {
        PackValue::Float(v)
    }
}

impl From<&str> for PackValue {
    fn from(v: &str) -> Self {
        PackValue::String(v.to_owned())
    }
}

impl From<String> for PackValue {
    fn from(v: String) -> Self {
        PackValue::String(v)
    }
}

impl From<Vec<u8>> for PackValue {
    fn from(v: Vec<u8>) -> Self {
        PackValue::Bytes(v)
    }
}

impl From<Vec<PackValue>> for PackValue {
    fn from(v: Vec<PackValue>) -> Self {
        PackValue::List(v)
    }
}

impl From<HashMap<String, PackValue>> for PackValue {
    fn from(v: HashMap<String, PackValue>) -> Self {
        PackValue::Map(v)
    }
}

impl From<Structure> for PackValue {
    fn from(v: Structure) -> Self {
        PackValue::Structure(v)
    }
}

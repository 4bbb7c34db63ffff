//! Query result records.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::{DriverError, DriverResult};
use super::value::Value;

/// One row of a query result.
///
/// Values are ordered to match the field-name header the server sends
/// once per RUN; the header is shared by every record of a stream.
#[derive(Debug, Clone)]
pub struct Record {
    keys: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Record {
    /// New record over a shared key header.
    pub fn new(keys: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// The ordered field names from the RUN header.
    ///
    /// This is a property of the stream, not of any one record, and it
    /// does not depend on how far iteration has progressed.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// The ordered field values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value under `key`, if the header contains it.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let index = self.keys.iter().position(|k| k == key)?;
        self.values.get(index)
    }

    /// Value at `index`.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// True when the header contains `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Typed extraction of the value under `key`.
    pub fn get_as<T>(&self, key: &str) -> DriverResult<T>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        let value = self
            .get(key)
            .ok_or_else(|| DriverError::type_conversion(format!("no field named '{}'", key)))?;
        T::try_from(value.clone())
    }

    /// Typed extraction treating `Null` and a missing field as `None`.
    pub fn get_optional<T>(&self, key: &str) -> DriverResult<Option<T>>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::try_from(value.clone()).map(Some),
        }
    }

    /// Copy into a key-to-value map.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::iter::Zip<std::vec::IntoIter<String>, std::vec::IntoIter<Value>>;

    fn into_iter(self) -> Self::IntoIter {
        let keys = (*self.keys).clone();
        keys.into_iter().zip(self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let keys = Arc::new(vec!["name".to_string(), "age".to_string()]);
        Record::new(
            keys,
            vec![Value::String("Alice".into()), Value::Integer(30)],
        )
    }

    #[test]
    fn lookup_by_key_and_index() {
        let r = sample();
        assert_eq!(r.get("name").and_then(|v| v.as_str()), Some("Alice"));
        assert_eq!(r.get("age").and_then(|v| v.as_int()), Some(30));
        assert!(r.get("missing").is_none());
        assert_eq!(r.get_index(1).and_then(|v| v.as_int()), Some(30));
        assert!(r.get_index(2).is_none());
    }

    #[test]
    fn keys_are_the_header() {
        let r = sample();
        assert_eq!(r.keys(), &["name".to_string(), "age".to_string()]);
        assert!(r.contains_key("name"));
        assert!(!r.contains_key("nope"));
        assert_eq!(r.len(), 2);
        assert!(!r.is_empty());
    }

    #[test]
    fn typed_extraction() {
        let r = sample();
        assert_eq!(r.get_as::<String>("name").unwrap(), "Alice");
        assert_eq!(r.get_as::<i64>("age").unwrap(), 30);
        assert!(r.get_as::<i64>("name").is_err());
        assert!(r.get_as::<i64>("missing").is_err());
    }

    #[test]
    fn optional_extraction() {
        let keys = Arc::new(vec!["n".to_string()]);
        let r = Record::new(keys, vec![Value::Null]);
        assert_eq!(r.get_optional::<i64>("n").unwrap(), None);
        assert_eq!(r.get_optional::<i64>("missing").unwrap(), None);

        let r = sample();
        assert_eq!(r.get_optional::<i64>("age").unwrap(), Some(30));
    }

    #[test]
    fn map_and_iteration() {
        let r = sample();
        let map = r.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("age"), Some(&Value::Integer(30)));

        let pairs: Vec<(String, Value)> = sample().into_iter().collect();
        assert_eq!(pairs[0].0, "name");
        assert_eq!(pairs[1].1, Value::Integer(30));
    }

    #[test]
    fn display() {
        let r = sample();
        assert_eq!(r.to_string(), "{name: \"Alice\", age: 30}");
    }
}

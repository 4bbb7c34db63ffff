//! Server-to-client messages.

use std::collections::HashMap;

use super::tag;
use crate::bolt::packstream::{PackError, PackValue, Structure};

/// Every response a server can send.
#[derive(Debug, Clone)]
pub enum Response {
    /// The request completed; metadata describes the outcome.
    Success(Success),
    /// One record of an open stream.
    Record(Vec<PackValue>),
    /// The request failed with a server error code.
    Failure(Failure),
    /// The request was ignored because the connection is in a failed
    /// state; only RESET will be acted on.
    Ignored,
}

impl Response {
    /// Wire tag of this response.
    pub fn tag(&self) -> u8 {
        match self {
            Response::Success(_) => tag::SUCCESS,
            Response::Record(_) => tag::RECORD,
            Response::Failure(_) => tag::FAILURE,
            Response::Ignored => tag::IGNORED,
        }
    }

    /// Message name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Response::Success(_) => "SUCCESS",
            Response::Record(_) => "RECORD",
            Response::Failure(_) => "FAILURE",
            Response::Ignored => "IGNORED",
        }
    }

    /// Encode into a PackStream structure.
    ///
    /// The driver only decodes responses; this direction exists for test
    /// fixtures that play the server side of the conversation.
    pub fn to_structure(&self) -> Structure {
        match self {
            Response::Success(m) => Structure::new(
                tag::SUCCESS,
                vec![PackValue::Map(m.metadata.clone())],
            ),
            Response::Record(fields) => {
                Structure::new(tag::RECORD, vec![PackValue::List(fields.clone())])
            }
            Response::Failure(f) => {
                let mut map = HashMap::new();
                map.insert("code".to_string(), PackValue::String(f.code.clone()));
                map.insert("message".to_string(), PackValue::String(f.message.clone()));
                Structure::new(tag::FAILURE, vec![PackValue::Map(map)])
            }
            Response::Ignored => Structure::new(tag::IGNORED, vec![]),
        }
    }

    /// Decode from a PackStream structure.
    pub fn from_structure(s: &Structure) -> Result<Self, PackError> {
        match s.tag {
            tag::SUCCESS => {
                let metadata = s
                    .field(0)
                    .and_then(|v| v.as_map())
                    .cloned()
                    .unwrap_or_default();
                Ok(Response::Success(Success { metadata }))
            }
            tag::RECORD => {
                let fields = s
                    .field(0)
                    .and_then(|v| v.as_list())
                    .map(|l| l.to_vec())
                    .ok_or_else(|| {
                        PackError::InvalidStructure("RECORD payload must be a list".into())
                    })?;
                Ok(Response::Record(fields))
            }
            tag::FAILURE => {
                let map = s
                    .field(0)
                    .and_then(|v| v.as_map())
                    .cloned()
                    .unwrap_or_default();
                let code = map
                    .get("code")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Neo.DatabaseError.General.UnknownError")
                    .to_string();
                let message = map
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(Response::Failure(Failure { code, message }))
            }
            tag::IGNORED => Ok(Response::Ignored),
            other => Err(PackError::InvalidStructure(format!(
                "unknown response tag 0x{:02X}",
                other
            ))),
        }
    }
}

/// SUCCESS metadata with typed accessors for the keys the driver reads.
#[derive(Debug, Clone, Default)]
pub struct Success {
    /// Raw metadata map.
    pub metadata: HashMap<String, PackValue>,
}

impl Success {
    /// Empty SUCCESS.
    pub fn new() -> Self {
        Self::default()
    }

    /// SUCCESS from a metadata map.
    pub fn with_metadata(metadata: HashMap<String, PackValue>) -> Self {
        Self { metadata }
    }

    /// Insert a metadata entry; used by test fixtures.
    pub fn set(&mut self, key: &str, value: PackValue) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Raw metadata entry.
    pub fn get(&self, key: &str) -> Option<&PackValue> {
        self.metadata.get(key)
    }

    /// Field names announced by a RUN SUCCESS.
    pub fn fields(&self) -> Option<Vec<String>> {
        self.metadata.get("fields").and_then(|v| v.as_list()).map(|l| {
            l.iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect()
        })
    }

    /// Stream handle assigned by a RUN SUCCESS.
    pub fn qid(&self) -> Option<i64> {
        self.metadata.get("qid").and_then(|v| v.as_int())
    }

    /// Whether the stream has more records after this batch.
    pub fn has_more(&self) -> bool {
        self.metadata
            .get("has_more")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Bookmark issued at the end of a stream or commit.
    pub fn bookmark(&self) -> Option<&str> {
        self.metadata.get("bookmark").and_then(|v| v.as_str())
    }

    /// Database the result came from.
    pub fn db(&self) -> Option<&str> {
        self.metadata.get("db").and_then(|v| v.as_str())
    }

    /// Server agent string from a HELLO SUCCESS.
    pub fn server(&self) -> Option<&str> {
        self.metadata.get("server").and_then(|v| v.as_str())
    }

    /// Connection id from a HELLO SUCCESS.
    pub fn connection_id(&self) -> Option<&str> {
        self.metadata.get("connection_id").and_then(|v| v.as_str())
    }

    /// Milliseconds until the first record was available.
    pub fn t_first(&self) -> Option<i64> {
        self.metadata.get("t_first").and_then(|v| v.as_int())
    }

    /// Milliseconds until the last record was consumed.
    pub fn t_last(&self) -> Option<i64> {
        self.metadata.get("t_last").and_then(|v| v.as_int())
    }

    /// Update counters of a write query.
    pub fn stats(&self) -> Option<&HashMap<String, PackValue>> {
        self.metadata.get("stats").and_then(|v| v.as_map())
    }

    /// Routing table payload of a ROUTE SUCCESS.
    ///
    /// 4.3 wraps the table in an `rt` entry; the legacy procedure call
    /// returns the same keys at the top level.
    pub fn routing_table(&self) -> Option<&HashMap<String, PackValue>> {
        match self.metadata.get("rt").and_then(|v| v.as_map()) {
            Some(rt) => Some(rt),
            None if self.metadata.contains_key("servers") => Some(&self.metadata),
            None => None,
        }
    }
}

/// FAILURE payload: a structured server error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Error code of the form `Neo.{Classification}.{Category}.{Title}`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl Failure {
    /// New failure from code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classification segment of the code (ClientError, TransientError, ...).
    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("")
    }

    /// Category segment of the code (Cluster, Security, Statement, ...).
    pub fn category(&self) -> &str {
        self.code.split('.').nth(2).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_roundtrip() {
        let mut success = Success::new();
        success.set(
            "fields",
            PackValue::List(vec![
                PackValue::String("n".into()),
                PackValue::String("m".into()),
            ]),
        );
        success.set("qid", PackValue::Integer(7));
        success.set("t_first", PackValue::Integer(3));

        let s = Response::Success(success).to_structure();
        let parsed = match Response::from_structure(&s).unwrap() {
            Response::Success(m) => m,
            other => panic!("expected SUCCESS, got {}", other.name()),
        };
        assert_eq!(parsed.fields(), Some(vec!["n".to_string(), "m".to_string()]));
        assert_eq!(parsed.qid(), Some(7));
        assert_eq!(parsed.t_first(), Some(3));
        assert!(!parsed.has_more());
    }

    #[test]
    fn record_roundtrip() {
        let record = Response::Record(vec![PackValue::Integer(1), PackValue::Null]);
        let s = record.to_structure();
        match Response::from_structure(&s).unwrap() {
            Response::Record(fields) => {
                assert_eq!(fields, vec![PackValue::Integer(1), PackValue::Null]);
            }
            other => panic!("expected RECORD, got {}", other.name()),
        }
    }

    #[test]
    fn record_requires_list_payload() {
        let s = Structure::new(tag::RECORD, vec![PackValue::Integer(1)]);
        assert!(Response::from_structure(&s).is_err());
    }

    #[test]
    fn failure_roundtrip() {
        let failure = Failure::new(
            "Neo.ClientError.Statement.SyntaxError",
            "Invalid input 'X'",
        );
        let s = Response::Failure(failure.clone()).to_structure();
        match Response::from_structure(&s).unwrap() {
            Response::Failure(f) => assert_eq!(f, failure),
            other => panic!("expected FAILURE, got {}", other.name()),
        }
    }

    #[test]
    fn failure_code_segments() {
        let f = Failure::new("Neo.ClientError.Cluster.NotALeader", "moved");
        assert_eq!(f.classification(), "ClientError");
        assert_eq!(f.category(), "Cluster");

        let f = Failure::new("Neo.TransientError.Transaction.DeadlockDetected", "");
        assert_eq!(f.classification(), "TransientError");
        assert_eq!(f.category(), "Transaction");
    }

    #[test]
    fn ignored_roundtrip() {
        let s = Response::Ignored.to_structure();
        assert!(matches!(
            Response::from_structure(&s).unwrap(),
            Response::Ignored
        ));
    }

    #[test]
    fn streaming_metadata() {
        let mut success = Success::new();
        success.set("has_more", PackValue::Boolean(true));
        assert!(success.has_more());

        let mut terminal = Success::new();
        terminal.set("bookmark", PackValue::String("bm:42".into()));
        terminal.set("db", PackValue::String("movies".into()));
        assert!(!terminal.has_more());
        assert_eq!(terminal.bookmark(), Some("bm:42"));
        assert_eq!(terminal.db(), Some("movies"));
    }

    #[test]
    fn routing_table_nested_and_flat() {
        let mut rt = HashMap::new();
        rt.insert("ttl".to_string(), PackValue::Integer(300));
        rt.insert("servers".to_string(), PackValue::List(vec![]));

        let mut nested = Success::new();
        nested.set("rt", PackValue::Map(rt.clone()));
        assert!(nested.routing_table().is_some());

        let flat = Success::with_metadata(rt);
        assert!(flat.routing_table().is_some());

        let none = Success::new();
        assert!(none.routing_table().is_none());
    }
}

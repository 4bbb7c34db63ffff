//! Client-to-server messages.

use std::collections::HashMap;
use std::time::Duration;

use super::tag;
use crate::bolt::packstream::{PackError, PackValue, Structure};

/// Every request this driver can put on the wire.
#[derive(Debug, Clone)]
pub enum Request {
    /// Initialise the connection and authenticate.
    Hello(Hello),
    /// Close the connection gracefully.
    Goodbye,
    /// Return the server to a known state.
    Reset,
    /// Execute a query.
    Run(Run),
    /// Request records from the open stream.
    Pull(Demand),
    /// Drop records from the open stream.
    Discard(Demand),
    /// Pre-4.0 form of PULL: everything, no demand map.
    PullAll,
    /// Pre-4.0 form of DISCARD.
    DiscardAll,
    /// Open an explicit transaction.
    Begin(Begin),
    /// Commit the open transaction.
    Commit,
    /// Roll back the open transaction.
    Rollback,
    /// Fetch the routing table (4.3+).
    Route(Route),
}

impl Request {
    /// Wire tag of this request.
    pub fn tag(&self) -> u8 {
        match self {
            Request::Hello(_) => tag::HELLO,
            Request::Goodbye => tag::GOODBYE,
            Request::Reset => tag::RESET,
            Request::Run(_) => tag::RUN,
            Request::Pull(_) | Request::PullAll => tag::PULL,
            Request::Discard(_) | Request::DiscardAll => tag::DISCARD,
            Request::Begin(_) => tag::BEGIN,
            Request::Commit => tag::COMMIT,
            Request::Rollback => tag::ROLLBACK,
            Request::Route(_) => tag::ROUTE,
        }
    }

    /// Message name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello(_) => "HELLO",
            Request::Goodbye => "GOODBYE",
            Request::Reset => "RESET",
            Request::Run(_) => "RUN",
            Request::Pull(_) => "PULL",
            Request::PullAll => "PULL_ALL",
            Request::Discard(_) => "DISCARD",
            Request::DiscardAll => "DISCARD_ALL",
            Request::Begin(_) => "BEGIN",
            Request::Commit => "COMMIT",
            Request::Rollback => "ROLLBACK",
            Request::Route(_) => "ROUTE",
        }
    }

    /// Encode into a PackStream structure.
    pub fn to_structure(&self) -> Structure {
        match self {
            Request::Hello(m) => m.to_structure(),
            Request::Goodbye => Structure::new(tag::GOODBYE, vec![]),
            Request::Reset => Structure::new(tag::RESET, vec![]),
            Request::Run(m) => m.to_structure(),
            Request::Pull(d) => d.to_structure(tag::PULL),
            Request::Discard(d) => d.to_structure(tag::DISCARD),
            Request::PullAll => Structure::new(tag::PULL, vec![]),
            Request::DiscardAll => Structure::new(tag::DISCARD, vec![]),
            Request::Begin(m) => m.to_structure(),
            Request::Commit => Structure::new(tag::COMMIT, vec![]),
            Request::Rollback => Structure::new(tag::ROLLBACK, vec![]),
            Request::Route(m) => m.to_structure(),
        }
    }

    /// Decode from a PackStream structure.
    ///
    /// The driver itself only encodes requests; this direction exists for
    /// test fixtures that play the server side of the conversation.
    pub fn from_structure(s: &Structure) -> Result<Self, PackError> {
        match s.tag {
            tag::HELLO => Ok(Request::Hello(Hello::from_structure(s)?)),
            tag::GOODBYE => Ok(Request::Goodbye),
            tag::RESET => Ok(Request::Reset),
            tag::RUN => Ok(Request::Run(Run::from_structure(s)?)),
            tag::PULL => {
                if s.fields.is_empty() {
                    Ok(Request::PullAll)
                } else {
                    Ok(Request::Pull(Demand::from_structure(s)?))
                }
            }
            tag::DISCARD => {
                if s.fields.is_empty() {
                    Ok(Request::DiscardAll)
                } else {
                    Ok(Request::Discard(Demand::from_structure(s)?))
                }
            }
            tag::BEGIN => Ok(Request::Begin(Begin::from_structure(s)?)),
            tag::COMMIT => Ok(Request::Commit),
            tag::ROLLBACK => Ok(Request::Rollback),
            tag::ROUTE => Ok(Request::Route(Route::from_structure(s)?)),
            other => Err(PackError::InvalidStructure(format!(
                "unknown request tag 0x{:02X}",
                other
            ))),
        }
    }
}

/// HELLO payload: user agent plus authentication and routing extras.
#[derive(Debug, Clone)]
pub struct Hello {
    /// Client identification string.
    pub user_agent: String,
    /// Flattened auth token entries (scheme, principal, credentials, ...).
    pub auth: HashMap<String, PackValue>,
    /// Routing context, sent from 4.1 on.
    pub routing: Option<HashMap<String, PackValue>>,
}

impl Hello {
    /// New HELLO with the given user agent and no auth.
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            auth: HashMap::new(),
            routing: None,
        }
    }

    /// Attach flattened auth entries.
    pub fn with_auth(mut self, auth: HashMap<String, PackValue>) -> Self {
        self.auth = auth;
        self
    }

    /// Attach a routing context.
    pub fn with_routing(mut self, routing: HashMap<String, PackValue>) -> Self {
        self.routing = Some(routing);
        self
    }

    fn to_structure(&self) -> Structure {
        let mut extra = self.auth.clone();
        extra.insert(
            "user_agent".to_string(),
            PackValue::String(self.user_agent.clone()),
        );
        if let Some(routing) = &self.routing {
            extra.insert("routing".to_string(), PackValue::Map(routing.clone()));
        }
        Structure::new(tag::HELLO, vec![PackValue::Map(extra)])
    }

    fn from_structure(s: &Structure) -> Result<Self, PackError> {
        let extra = s
            .field(0)
            .and_then(|v| v.as_map())
            .ok_or_else(|| PackError::InvalidStructure("HELLO needs an extra map".into()))?;

        let user_agent = extra
            .get("user_agent")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let routing = extra.get("routing").and_then(|v| v.as_map()).cloned();

        let mut auth = HashMap::new();
        for (k, v) in extra {
            if k != "user_agent" && k != "routing" {
                auth.insert(k.clone(), v.clone());
            }
        }

        Ok(Self {
            user_agent,
            auth,
            routing,
        })
    }
}

/// RUN payload.
#[derive(Debug, Clone)]
pub struct Run {
    /// Cypher text.
    pub query: String,
    /// Query parameters.
    pub parameters: HashMap<String, PackValue>,
    /// Extras: db, bookmarks, mode, tx_timeout, tx_metadata.
    pub extra: HashMap<String, PackValue>,
}

impl Run {
    /// New RUN with no parameters or extras.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: HashMap::new(),
            extra: HashMap::new(),
        }
    }

    /// Attach parameters.
    pub fn with_parameters(mut self, parameters: HashMap<String, PackValue>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attach extras.
    pub fn with_extra(mut self, extra: HashMap<String, PackValue>) -> Self {
        self.extra = extra;
        self
    }

    fn to_structure(&self) -> Structure {
        Structure::new(
            tag::RUN,
            vec![
                PackValue::String(self.query.clone()),
                PackValue::Map(self.parameters.clone()),
                PackValue::Map(self.extra.clone()),
            ],
        )
    }

    fn from_structure(s: &Structure) -> Result<Self, PackError> {
        let query = s
            .field(0)
            .and_then(|v| v.as_str())
            .ok_or_else(|| PackError::InvalidStructure("RUN query must be a string".into()))?
            .to_string();
        let parameters = s
            .field(1)
            .and_then(|v| v.as_map())
            .cloned()
            .unwrap_or_default();
        let extra = s
            .field(2)
            .and_then(|v| v.as_map())
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            query,
            parameters,
            extra,
        })
    }
}

/// Demand map shared by PULL and DISCARD: how many records, which stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    /// Record count, -1 for the whole remainder.
    pub n: i64,
    /// Stream handle; absent targets the only open stream.
    pub qid: Option<i64>,
}

impl Demand {
    /// Demand the whole remainder of the stream.
    pub fn all() -> Self {
        Self { n: -1, qid: None }
    }

    /// Demand `n` records.
    pub fn of(n: i64) -> Self {
        Self { n, qid: None }
    }

    /// Target a specific stream.
    pub fn for_stream(mut self, qid: i64) -> Self {
        self.qid = Some(qid);
        self
    }

    fn to_structure(&self, tag: u8) -> Structure {
        let mut extra = HashMap::new();
        extra.insert("n".to_string(), PackValue::Integer(self.n));
        if let Some(qid) = self.qid {
            extra.insert("qid".to_string(), PackValue::Integer(qid));
        }
        Structure::new(tag, vec![PackValue::Map(extra)])
    }

    fn from_structure(s: &Structure) -> Result<Self, PackError> {
        let extra = s
            .field(0)
            .and_then(|v| v.as_map())
            .ok_or_else(|| PackError::InvalidStructure("demand map expected".into()))?;
        let n = extra.get("n").and_then(|v| v.as_int()).unwrap_or(-1);
        let qid = extra.get("qid").and_then(|v| v.as_int());
        Ok(Self { n, qid })
    }
}

/// BEGIN payload.
#[derive(Debug, Clone, Default)]
pub struct Begin {
    /// Extras: db, bookmarks, mode, tx_timeout, tx_metadata.
    pub extra: HashMap<String, PackValue>,
}

impl Begin {
    /// New BEGIN with the given extras.
    pub fn new(extra: HashMap<String, PackValue>) -> Self {
        Self { extra }
    }

    fn to_structure(&self) -> Structure {
        Structure::new(tag::BEGIN, vec![PackValue::Map(self.extra.clone())])
    }

    fn from_structure(s: &Structure) -> Result<Self, PackError> {
        let extra = s
            .field(0)
            .and_then(|v| v.as_map())
            .cloned()
            .unwrap_or_default();
        Ok(Self { extra })
    }
}

/// ROUTE payload.
#[derive(Debug, Clone, Default)]
pub struct Route {
    /// Routing context from the connection URI.
    pub context: HashMap<String, PackValue>,
    /// Bookmarks to wait for before answering.
    pub bookmarks: Vec<String>,
    /// Database to route for; `None` targets the default database.
    pub database: Option<String>,
}

impl Route {
    /// New ROUTE request.
    pub fn new(
        context: HashMap<String, PackValue>,
        bookmarks: Vec<String>,
        database: Option<String>,
    ) -> Self {
        Self {
            context,
            bookmarks,
            database,
        }
    }

    fn to_structure(&self) -> Structure {
        let bookmarks = self
            .bookmarks
            .iter()
            .map(|b| PackValue::String(b.clone()))
            .collect();
        let db = match &self.database {
            Some(name) => PackValue::String(name.clone()),
            None => PackValue::Null,
        };
        Structure::new(
            tag::ROUTE,
            vec![
                PackValue::Map(self.context.clone()),
                PackValue::List(bookmarks),
                db,
            ],
        )
    }

    fn from_structure(s: &Structure) -> Result<Self, PackError> {
        let context = s
            .field(0)
            .and_then(|v| v.as_map())
            .cloned()
            .unwrap_or_default();
        let bookmarks = s
            .field(1)
            .and_then(|v| v.as_list())
            .map(|l| {
                l.iter()
                    .filter_map(|b| b.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let database = s.field(2).and_then(|v| v.as_str()).map(str::to_string);
        Ok(Self {
            context,
            bookmarks,
            database,
        })
    }
}

/// Build the extras map shared by RUN (auto-commit) and BEGIN.
pub fn tx_extra(
    database: Option<&str>,
    bookmarks: &[String],
    read_mode: bool,
    tx_timeout: Option<Duration>,
    tx_metadata: Option<&HashMap<String, PackValue>>,
) -> HashMap<String, PackValue> {
    let mut extra = HashMap::new();
    if let Some(db) = database {
        extra.insert("db".to_string(), PackValue::String(db.to_string()));
    }
    if !bookmarks.is_empty() {
        let list = bookmarks
            .iter()
            .map(|b| PackValue::String(b.clone()))
            .collect();
        extra.insert("bookmarks".to_string(), PackValue::List(list));
    }
    if read_mode {
        extra.insert("mode".to_string(), PackValue::String("r".to_string()));
    }
    if let Some(timeout) = tx_timeout {
        extra.insert(
            "tx_timeout".to_string(),
            PackValue::Integer(timeout.as_millis() as i64),
        );
    }
    if let Some(metadata) = tx_metadata {
        if !metadata.is_empty() {
            extra.insert("tx_metadata".to_string(), PackValue::Map(metadata.clone()));
        }
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_roundtrip() {
        let mut auth = HashMap::new();
        auth.insert("scheme".to_string(), PackValue::String("basic".into()));
        auth.insert("principal".to_string(), PackValue::String("neo4j".into()));
        auth.insert("credentials".to_string(), PackValue::String("pw".into()));

        let hello = Hello::new("bifrost/0.1").with_auth(auth);
        let s = hello.to_structure();
        assert_eq!(s.tag, tag::HELLO);

        let parsed = Hello::from_structure(&s).unwrap();
        assert_eq!(parsed.user_agent, "bifrost/0.1");
        assert_eq!(
            parsed.auth.get("scheme").and_then(|v| v.as_str()),
            Some("basic")
        );
        assert!(parsed.routing.is_none());
    }

    #[test]
    fn hello_carries_routing_context() {
        let mut routing = HashMap::new();
        routing.insert("address".to_string(), PackValue::String("core1:7687".into()));
        let hello = Hello::new("bifrost/0.1").with_routing(routing);
        let parsed = Hello::from_structure(&hello.to_structure()).unwrap();
        assert!(parsed.routing.is_some());
    }

    #[test]
    fn run_roundtrip() {
        let mut params = HashMap::new();
        params.insert("limit".to_string(), PackValue::Integer(10));
        let run = Run::new("MATCH (n) RETURN n LIMIT $limit").with_parameters(params);
        let s = run.to_structure();
        assert_eq!(s.tag, tag::RUN);

        let parsed = Run::from_structure(&s).unwrap();
        assert_eq!(parsed.query, "MATCH (n) RETURN n LIMIT $limit");
        assert_eq!(
            parsed.parameters.get("limit").and_then(|v| v.as_int()),
            Some(10)
        );
    }

    #[test]
    fn demand_roundtrip() {
        let d = Demand::of(1000).for_stream(3);
        let s = d.to_structure(tag::PULL);
        assert_eq!(s.tag, tag::PULL);
        assert_eq!(Demand::from_structure(&s).unwrap(), d);

        let all = Demand::all();
        assert_eq!(all.n, -1);
        assert!(all.qid.is_none());
    }

    #[test]
    fn legacy_pull_has_no_fields() {
        let s = Request::PullAll.to_structure();
        assert_eq!(s.tag, tag::PULL);
        assert!(s.fields.is_empty());
        assert!(matches!(
            Request::from_structure(&s).unwrap(),
            Request::PullAll
        ));

        let s = Request::DiscardAll.to_structure();
        assert!(matches!(
            Request::from_structure(&s).unwrap(),
            Request::DiscardAll
        ));
    }

    #[test]
    fn begin_roundtrip() {
        let extra = tx_extra(
            Some("movies"),
            &["bm:1".to_string()],
            true,
            Some(Duration::from_secs(5)),
            None,
        );
        let begin = Begin::new(extra);
        let parsed = Begin::from_structure(&begin.to_structure()).unwrap();
        assert_eq!(
            parsed.extra.get("db").and_then(|v| v.as_str()),
            Some("movies")
        );
        assert_eq!(
            parsed.extra.get("mode").and_then(|v| v.as_str()),
            Some("r")
        );
        assert_eq!(
            parsed.extra.get("tx_timeout").and_then(|v| v.as_int()),
            Some(5000)
        );
    }

    #[test]
    fn route_roundtrip() {
        let route = Route::new(HashMap::new(), vec!["bm:9".into()], Some("movies".into()));
        let s = route.to_structure();
        assert_eq!(s.tag, tag::ROUTE);
        let parsed = Route::from_structure(&s).unwrap();
        assert_eq!(parsed.database.as_deref(), Some("movies"));
        assert_eq!(parsed.bookmarks, vec!["bm:9".to_string()]);
    }

    #[test]
    fn route_null_database() {
        let route = Route::default();
        let parsed = Route::from_structure(&route.to_structure()).unwrap();
        assert!(parsed.database.is_none());
    }

    #[test]
    fn tx_extra_omits_empty_entries() {
        let extra = tx_extra(None, &[], false, None, None);
        assert!(extra.is_empty());
    }

    #[test]
    fn request_tags_and_names() {
        assert_eq!(Request::Goodbye.tag(), tag::GOODBYE);
        assert_eq!(Request::Reset.name(), "RESET");
        assert_eq!(Request::Commit.tag(), tag::COMMIT);
        assert_eq!(Request::Rollback.name(), "ROLLBACK");
        assert_eq!(Request::Pull(Demand::all()).name(), "PULL");
        assert_eq!(Request::PullAll.tag(), tag::PULL);
    }
}

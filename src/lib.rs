//! # Bifrost Driver
//!
//! An asynchronous Rust driver for Neo4j-compatible graph databases,
//! speaking the Bolt binary protocol over TCP or TLS.
//!
//! ## Features
//!
//! - **Bolt 3.0 through 4.4** with version-negotiated behaviour
//! - **Async/await** on Tokio throughout
//! - **Connection pooling** with a bounded per-authority pool and lazy
//!   reuse of streaming connections
//! - **Cluster routing** for `neo4j://` URIs: role-based server
//!   selection, cached routing tables with TTL, failover on topology
//!   changes
//! - **Streaming results** through a lazy, seekable cursor
//! - **Causal chaining** via bookmarks, handled by the session
//! - **Managed transactions** with exponential backoff and jitter
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bifrost_driver::{AuthToken, Driver, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Driver::new(
//!         "bolt://localhost:7687",
//!         AuthToken::basic("neo4j", "password"),
//!     )?;
//!
//!     let session = driver.session(SessionConfig::default());
//!     let mut result = session
//!         .run("MATCH (n:Person) RETURN n.name AS name LIMIT 10", None)
//!         .await?;
//!
//!     while let Some(record) = result.next().await? {
//!         println!("{}", record.get_as::<String>("name")?);
//!     }
//!
//!     driver.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Explicit transactions
//!
//! ```rust,no_run
//! # use bifrost_driver::{params, AuthToken, Driver, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("bolt://localhost:7687", AuthToken::none())?;
//! let session = driver.session(SessionConfig::default());
//!
//! let mut tx = session.begin_transaction(None).await?;
//! tx.run("CREATE (:Person {name: $name})", Some(params! { "name" => "Alice" }))
//!     .await?
//!     .consume()
//!     .await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Managed transactions
//!
//! `read_transaction` and `write_transaction` retry the whole unit of
//! work on transient and cluster errors with exponential backoff:
//!
//! ```rust,no_run
//! # use bifrost_driver::{AuthToken, Driver, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("neo4j://localhost:7687", AuthToken::none())?;
//! let session = driver.session(SessionConfig::default());
//! let created = session
//!     .write_transaction(|mut tx| async move {
//!         let mut cursor = tx.run("CREATE (n:Job) RETURN id(n) AS id", None).await?;
//!         let record = cursor.single().await?;
//!         let id = record.get_as::<i64>("id")?;
//!         tx.commit().await?;
//!         Ok(id)
//!     })
//!     .await?;
//! # let _ = created;
//! # Ok(())
//! # }
//! ```
//!
//! ## URI schemes
//!
//! | Scheme | Family | TLS |
//! |---|---|---|
//! | `bolt` | direct | none |
//! | `bolt+s` | direct | verified |
//! | `bolt+ssc` | direct | self-signed accepted |
//! | `neo4j` | routed | none |
//! | `neo4j+s` | routed | verified |
//! | `neo4j+ssc` | routed | self-signed accepted |
//!
//! `http`/`https` URIs are recognized but served by a separate HTTP
//! transport crate.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bolt;
pub mod driver;

pub use driver::{
    AccessMode, AuthToken, Bookmark, ConnectionUri, Counters, Driver, DriverConfig,
    DriverConfigBuilder, DriverError, DriverResult, InMemoryRoutingCache, Node, OffsetTime, Path,
    Point, PoolMetrics, Query, Record, RecordCursor, Relationship, ResultSummary, RetryPolicy,
    RoutingCache, RoutingTable, Scheme, ServerAddress, ServerRole, ServerState, Session,
    SessionConfig, SessionConfigBuilder, TlsPolicy, Transaction, TransactionConfig,
    TransactionState, UnboundRelationship, Value,
};

pub use bolt::{BoltVersion, PackValue};

/// Build a parameter map from `key => value` pairs.
///
/// ```rust
/// use bifrost_driver::{params, Value};
///
/// let map = params! { "name" => "Alice", "age" => 30i64 };
/// assert_eq!(map.get("age"), Some(&Value::Integer(30)));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::<String, $crate::Value>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::<String, $crate::Value>::new();
        $(
            map.insert($key.into(), $crate::Value::from($value));
        )+
        map
    }};
}

//! The driver API: connections, pools, sessions, transactions, routing.
//!
//! Construction starts at [`Driver`]; everything else is reached from
//! there. A [`Session`] borrows connections from the driver's pools for
//! the duration of each request, a [`RecordCursor`] streams one query's
//! records, and [`Transaction`] pins one connection from BEGIN to
//! COMMIT or ROLLBACK.

pub(crate) mod connection;
pub mod cursor;
#[allow(clippy::module_inception)]
pub mod driver;
pub mod error;
pub mod pool;
pub mod record;
pub mod retry;
pub mod routing;
pub mod session;
pub mod summary;
pub(crate) mod tls;
pub mod transaction;
pub mod uri;
pub mod value;

pub use connection::ServerState;
pub use cursor::RecordCursor;
pub use driver::{AuthToken, Driver, DriverConfig, DriverConfigBuilder, ServerAddress};
pub use error::{DriverError, DriverResult};
pub use pool::{PoolConfig, PoolMetrics};
pub use record::Record;
pub use retry::RetryPolicy;
pub use routing::{InMemoryRoutingCache, RoutingCache, RoutingTable, ServerRole};
pub use session::{
    AccessMode, Bookmark, Query, Session, SessionConfig, SessionConfigBuilder,
};
pub use summary::{Counters, ResultSummary};
pub use transaction::{Transaction, TransactionConfig, TransactionState};
pub use uri::{ConnectionUri, Scheme, TlsPolicy};
pub use value::{
    Duration as ValueDuration, Node, OffsetTime, Path, Point, Relationship,
    UnboundRelationship, Value,
};

//! Cluster routing: table cache, server roles and the routing driver.

mod cache;
mod driver;
mod table;

pub use cache::{InMemoryRoutingCache, RoutingCache};
pub use table::{RoutingTable, ServerRole};

pub(crate) use driver::RoutingDriver;

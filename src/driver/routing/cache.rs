//! Pluggable routing table cache.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use super::table::RoutingTable;

/// Storage for routing tables, keyed by database name.
///
/// The driver injects an [`InMemoryRoutingCache`] by default; an
/// application that wants to warm tables across processes can plug in
/// its own implementation. Staleness is judged by the driver, not the
/// cache: a stored table past its TTL is simply refreshed on the next
/// acquire.
pub trait RoutingCache: Send + Sync + fmt::Debug {
    /// Table for `database`, if one is stored.
    fn get(&self, database: &str) -> Option<RoutingTable>;

    /// Store the table for `database`.
    fn put(&self, database: &str, table: RoutingTable);

    /// Drop the table for `database`, forcing a refresh on next use.
    fn invalidate(&self, database: &str);
}

/// Process-local routing cache.
#[derive(Default)]
pub struct InMemoryRoutingCache {
    tables: RwLock<HashMap<String, RoutingTable>>,
}

impl InMemoryRoutingCache {
    /// New, empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingCache for InMemoryRoutingCache {
    fn get(&self, database: &str) -> Option<RoutingTable> {
        self.tables.read().get(database).cloned()
    }

    fn put(&self, database: &str, table: RoutingTable) {
        self.tables.write().insert(database.to_string(), table);
    }

    fn invalidate(&self, database: &str) {
        self.tables.write().remove(database);
    }
}

impl fmt::Debug for InMemoryRoutingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRoutingCache")
            .field("databases", &self.tables.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn put_get_invalidate() {
        let cache = InMemoryRoutingCache::new();
        assert!(cache.get("movies").is_none());

        let mut table = RoutingTable::new("movies");
        table.ttl = Duration::from_secs(300);
        cache.put("movies", table);

        let stored = cache.get("movies").unwrap();
        assert_eq!(stored.database, "movies");

        cache.invalidate("movies");
        assert!(cache.get("movies").is_none());
    }

    #[test]
    fn databases_are_independent() {
        let cache = InMemoryRoutingCache::new();
        cache.put("a", RoutingTable::new("a"));
        cache.put("b", RoutingTable::new("b"));
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }
}

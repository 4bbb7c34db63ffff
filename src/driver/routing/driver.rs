//! Routing driver for `neo4j*` schemes.
//!
//! Keeps one routing table per database (behind the injected cache) and
//! one connection pool per discovered cluster member. Every acquire
//! picks a server of the required role round-robin; connection-level
//! failures mark the address bad for the current table generation and
//! move on, and exhausting every candidate invalidates the table so the
//! next attempt re-fetches it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::super::driver::{DriverConfig, ServerAddress};
use super::super::error::{DriverError, DriverResult};
use super::super::pool::{ConnectionHandle, ConnectionPool, PoolMetrics};
use super::super::session::AccessMode;
use super::cache::{InMemoryRoutingCache, RoutingCache};
use super::table::RoutingTable;

/// How many times an acquire will refresh the table and restart its
/// server walk before giving up.
const MAX_ROUTING_ATTEMPTS: usize = 2;

pub(crate) struct RoutingDriver {
    config: Arc<DriverConfig>,
    initial_routers: Vec<ServerAddress>,
    cache: Arc<dyn RoutingCache>,
    pools: RwLock<HashMap<ServerAddress, Arc<ConnectionPool>>>,
    read_index: AtomicUsize,
    write_index: AtomicUsize,
    open: AtomicBool,
}

impl RoutingDriver {
    pub(crate) fn new(config: Arc<DriverConfig>) -> Arc<Self> {
        let cache = config
            .routing_cache
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryRoutingCache::new()));
        let initial_routers = vec![config.address()];
        Arc::new(Self {
            config,
            initial_routers,
            cache,
            pools: RwLock::new(HashMap::new()),
            read_index: AtomicUsize::new(0),
            write_index: AtomicUsize::new(0),
            open: AtomicBool::new(true),
        })
    }

    /// Acquire a connection to a server of the role `mode` requires.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        database: Option<&str>,
        mode: AccessMode,
        bookmarks: &[String],
    ) -> DriverResult<ConnectionHandle> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DriverError::session("driver is closed"));
        }

        let key = cache_key(database);
        for _ in 0..MAX_ROUTING_ATTEMPTS {
            let table = self.fresh_table(database, bookmarks).await?;

            // A READ whose table advertises no readers falls back to
            // the writers rather than failing outright.
            let candidates: Vec<ServerAddress> = match mode {
                AccessMode::Write => table.writers.clone(),
                AccessMode::Read => {
                    if table.readers.is_empty() {
                        table.writers.clone()
                    } else {
                        table.readers.clone()
                    }
                }
            };

            if candidates.is_empty() {
                self.cache.invalidate(key);
                continue;
            }

            let counter = match mode {
                AccessMode::Read => &self.read_index,
                AccessMode::Write => &self.write_index,
            };
            let start = counter.fetch_add(1, Ordering::Relaxed);

            for i in 0..candidates.len() {
                let address = &candidates[(start + i) % candidates.len()];
                let pool = self.pool_for(address);
                match pool.acquire().await {
                    Ok(handle) => return Ok(handle),
                    Err(e)
                        if matches!(
                            e,
                            DriverError::Io(_)
                                | DriverError::ServiceUnavailable(_)
                                | DriverError::Protocol(_)
                        ) =>
                    {
                        warn!(address = %address, error = %e, "server unreachable, trying next");
                        self.forget_server(database, address);
                    }
                    Err(other) => return Err(other),
                }
            }

            self.cache.invalidate(key);
        }

        Err(DriverError::unavailable(format!(
            "no {} server reachable for database '{}'",
            match mode {
                AccessMode::Read => "READ",
                AccessMode::Write => "WRITE",
            },
            key
        )))
    }

    /// React to a cluster-topology error observed on `address`.
    ///
    /// The address is dropped from the current table generation and the
    /// table is invalidated so the next acquire re-fetches it.
    pub(crate) fn on_cluster_error(&self, database: Option<&str>, address: &ServerAddress) {
        debug!(address = %address, "cluster error, invalidating routing table");
        self.forget_server(database, address);
        self.cache.invalidate(cache_key(database));
    }

    /// Routing table currently cached for `database`, if any.
    pub(crate) fn cached_table(&self, database: Option<&str>) -> Option<RoutingTable> {
        self.cache.get(cache_key(database))
    }

    pub(crate) async fn verify_connectivity(self: &Arc<Self>) -> DriverResult<()> {
        for router in &self.initial_routers {
            let pool = self.pool_for(router);
            if pool.verify_connectivity().await.is_ok() {
                return Ok(());
            }
        }
        Err(DriverError::unavailable("no router reachable"))
    }

    pub(crate) async fn close(&self) {
        self.open.store(false, Ordering::Release);
        let pools: Vec<Arc<ConnectionPool>> = self.pools.read().values().cloned().collect();
        for pool in pools {
            pool.close().await;
        }
    }

    /// Aggregate metrics across every per-address pool.
    pub(crate) fn metrics(&self) -> PoolMetrics {
        let pools = self.pools.read();
        let mut total = PoolMetrics::default();
        for pool in pools.values() {
            let m = pool.metrics();
            total.size += m.size;
            total.idle += m.idle;
            total.in_use += m.in_use;
            total.total_acquired += m.total_acquired;
            total.total_created += m.total_created;
            total.total_closed += m.total_closed;
            total.total_timeouts += m.total_timeouts;
        }
        total
    }

    /// Return a fresh (non-stale) table, fetching one if needed.
    async fn fresh_table(
        self: &Arc<Self>,
        database: Option<&str>,
        bookmarks: &[String],
    ) -> DriverResult<RoutingTable> {
        if let Some(table) = self.cache.get(cache_key(database)) {
            if !table.is_stale() {
                return Ok(table);
            }
        }
        self.refresh_table(database, bookmarks).await
    }

    /// Fetch the table from the first router that answers.
    async fn refresh_table(
        self: &Arc<Self>,
        database: Option<&str>,
        bookmarks: &[String],
    ) -> DriverResult<RoutingTable> {
        let mut candidates: Vec<ServerAddress> = Vec::new();
        if let Some(table) = self.cache.get(cache_key(database)) {
            candidates.extend(table.routers.iter().cloned());
        }
        for router in &self.initial_routers {
            if !candidates.contains(router) {
                candidates.push(router.clone());
            }
        }

        for router in &candidates {
            let pool = self.pool_for(router);
            let handle = match pool.acquire().await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(router = %router, error = %e, "router unreachable");
                    continue;
                }
            };

            let result = {
                let mut conn = handle.connection().lock().await;
                conn.route(
                    self.config.routing_context_wire(),
                    bookmarks.to_vec(),
                    database,
                )
                .await
            };
            handle.release().await;

            match result {
                Ok(table) => {
                    debug!(
                        database = cache_key(database),
                        routers = table.routers.len(),
                        readers = table.readers.len(),
                        writers = table.writers.len(),
                        ttl = ?table.ttl,
                        "routing table refreshed"
                    );
                    self.cache.put(cache_key(database), table.clone());
                    return Ok(table);
                }
                Err(e) => {
                    warn!(router = %router, error = %e, "routing table fetch failed");
                }
            }
        }

        Err(DriverError::unavailable(
            "could not fetch a routing table from any router",
        ))
    }

    fn forget_server(&self, database: Option<&str>, address: &ServerAddress) {
        let key = cache_key(database);
        if let Some(mut table) = self.cache.get(key) {
            table.remove_server(address);
            self.cache.put(key, table);
        }
    }

    fn pool_for(&self, address: &ServerAddress) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.read().get(address) {
            return pool.clone();
        }
        let mut pools = self.pools.write();
        if let Some(pool) = pools.get(address) {
            return pool.clone();
        }
        let pool = ConnectionPool::new(
            address.clone(),
            self.config.uri.tls_policy(),
            self.config.auth.clone(),
            self.config.user_agent.clone(),
            Some(self.config.routing_context_wire()),
            self.config.pool_config(),
        );
        pools.insert(address.clone(), pool.clone());
        pool
    }
}

fn cache_key(database: Option<&str>) -> &str {
    database.unwrap_or("")
}

impl std::fmt::Debug for RoutingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingDriver")
            .field("initial_routers", &self.initial_routers)
            .field("pools", &self.pools.read().len())
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::driver::AuthToken;

    fn test_driver() -> Arc<RoutingDriver> {
        let config =
            DriverConfig::new("neo4j://localhost:7687", AuthToken::none()).expect("valid uri");
        RoutingDriver::new(Arc::new(config))
    }

    #[test]
    fn starts_with_the_uri_as_router() {
        let driver = test_driver();
        assert_eq!(driver.initial_routers.len(), 1);
        assert_eq!(driver.initial_routers[0], ServerAddress::new("localhost", 7687));
    }

    #[test]
    fn fresh_driver_has_no_pools_or_tables() {
        let driver = test_driver();
        assert_eq!(driver.metrics().size, 0);
        assert!(driver.cached_table(None).is_none());
        assert!(driver.cached_table(Some("movies")).is_none());
    }

    #[test]
    fn cluster_error_invalidates_cached_table() {
        let driver = test_driver();
        let mut table = RoutingTable::new("movies");
        table.ttl = std::time::Duration::from_secs(300);
        let writer = ServerAddress::new("core1", 7687);
        table.writers.push(writer.clone());
        table.routers.push(writer.clone());
        driver.cache.put("movies", table);

        driver.on_cluster_error(Some("movies"), &writer);
        assert!(driver.cached_table(Some("movies")).is_none());
    }

    #[test]
    fn cache_key_defaults_to_empty() {
        assert_eq!(cache_key(None), "");
        assert_eq!(cache_key(Some("movies")), "movies");
    }
}

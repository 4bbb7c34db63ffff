//! Sessions: configuration, bookmarks and the transaction surface.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::bolt::message::request::tx_extra;
use crate::bolt::packstream::PackValue;

use super::cursor::RecordCursor;
use super::driver::{DriverConfig, ServerAddress};
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionHandle, ConnectionPool};
use super::routing::RoutingDriver;
use super::transaction::{Transaction, TransactionConfig};
use super::value::Value;

/// Which cluster role a unit of work needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Route to a reader.
    Read,
    /// Route to the writer.
    #[default]
    Write,
}

/// Opaque causal-consistency token issued by the server.
///
/// A session forwards its latest bookmarks with every new transaction
/// so the server can wait until that point in the causal chain is
/// visible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark {
    value: String,
}

impl Bookmark {
    /// Wrap a raw bookmark string.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// The raw token.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl From<String> for Bookmark {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Bookmark {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Shared, updatable bookmark set.
///
/// The session owns one of these and every cursor and transaction it
/// spawns holds a clone, so a bookmark arriving in terminal stream
/// metadata or a COMMIT SUCCESS lands back in the session.
#[derive(Debug, Clone, Default)]
pub(crate) struct BookmarkState {
    inner: Arc<RwLock<Vec<Bookmark>>>,
}

impl BookmarkState {
    pub(crate) fn with_initial(bookmarks: Vec<Bookmark>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(bookmarks)),
        }
    }

    /// Raw values for the wire.
    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.inner.read().iter().map(|b| b.value.clone()).collect()
    }

    /// Replace the set with the single bookmark a commit returned.
    pub(crate) fn update(&self, bookmark: String) {
        *self.inner.write() = vec![Bookmark::new(bookmark)];
    }

    pub(crate) fn bookmarks(&self) -> Vec<Bookmark> {
        self.inner.read().clone()
    }
}

/// Per-session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Database to target; `None` uses the URI's `database` query key,
    /// falling back to the server default.
    pub database: Option<String>,
    /// Records per PULL; `None` uses the driver default, -1 pulls
    /// everything at once.
    pub fetch_size: Option<i64>,
    /// Role requests are routed to.
    pub access_mode: AccessMode,
    /// Bookmarks the first transaction must wait for.
    pub bookmarks: Vec<Bookmark>,
}

impl SessionConfig {
    /// Fresh default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a configuration.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Target database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Records per PULL (-1 for everything at once).
    pub fn with_fetch_size(mut self, fetch_size: i64) -> Self {
        self.config.fetch_size = Some(fetch_size);
        self
    }

    /// Route to readers.
    pub fn with_read_access(mut self) -> Self {
        self.config.access_mode = AccessMode::Read;
        self
    }

    /// Route to the writer.
    pub fn with_write_access(mut self) -> Self {
        self.config.access_mode = AccessMode::Write;
        self
    }

    /// Initial bookmark set.
    pub fn with_bookmarks(mut self, bookmarks: Vec<Bookmark>) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    /// Add one bookmark.
    pub fn with_bookmark(mut self, bookmark: impl Into<Bookmark>) -> Self {
        self.config.bookmarks.push(bookmark.into());
        self
    }

    /// Finish.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// A query with parameters and optional per-statement settings.
#[derive(Debug, Clone)]
pub struct Query {
    /// Cypher text.
    pub text: String,
    /// Parameters referenced from the text.
    pub parameters: HashMap<String, Value>,
    /// Server-side timeout for the enclosing transaction.
    pub timeout: Option<Duration>,
    /// Metadata attached to the enclosing transaction.
    pub metadata: HashMap<String, Value>,
}

impl Query {
    /// New query with no parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
            timeout: None,
            metadata: HashMap::new(),
        }
    }

    /// Add one parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Merge a parameter map.
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }

    /// Server-side timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach transaction metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Where a session gets its connections from.
#[derive(Debug, Clone)]
pub(crate) enum ConnectionProvider {
    /// Direct driver: one pool, one authority.
    Direct(Arc<ConnectionPool>),
    /// Routing driver: role-based selection over the cluster.
    Routed(Arc<RoutingDriver>),
}

impl ConnectionProvider {
    pub(crate) async fn acquire(
        &self,
        database: Option<&str>,
        mode: AccessMode,
        bookmarks: &[String],
    ) -> DriverResult<ConnectionHandle> {
        match self {
            ConnectionProvider::Direct(pool) => pool.acquire().await,
            ConnectionProvider::Routed(routing) => {
                routing.acquire(database, mode, bookmarks).await
            }
        }
    }

    pub(crate) fn on_cluster_error(&self, database: Option<&str>, address: &ServerAddress) {
        if let ConnectionProvider::Routed(routing) = self {
            routing.on_cluster_error(database, address);
        }
    }
}

/// A logical conversation with the database.
///
/// Sessions are cheap: they borrow connections from the driver only for
/// the duration of each request. A session is not meant to be shared
/// across tasks; create one per unit of work.
pub struct Session {
    provider: ConnectionProvider,
    driver_config: Arc<DriverConfig>,
    config: SessionConfig,
    bookmarks: BookmarkState,
    open: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        provider: ConnectionProvider,
        driver_config: Arc<DriverConfig>,
        config: SessionConfig,
    ) -> Self {
        let bookmarks = BookmarkState::with_initial(config.bookmarks.clone());
        Self {
            provider,
            driver_config,
            config,
            bookmarks,
            open: AtomicBool::new(true),
        }
    }

    /// Run an auto-commit query and stream its result.
    ///
    /// The connection is parked back in the pool right away; the
    /// returned cursor pulls batches on demand and the implicit commit
    /// happens when the stream ends. The bookmark from the terminal
    /// metadata feeds the session's causal chain.
    pub async fn run(
        &self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<RecordCursor> {
        self.ensure_open()?;

        let mut query = query.into();
        if let Some(params) = params {
            query = query.with_params(params);
        }

        let bookmarks = self.bookmarks.snapshot();
        let database = self.database().map(str::to_string);
        let handle = self
            .provider
            .acquire(database.as_deref(), self.config.access_mode, &bookmarks)
            .await?;

        let extra = tx_extra(
            database.as_deref(),
            &bookmarks,
            self.config.access_mode == AccessMode::Read,
            query.timeout,
            Some(&wire_map(&query.metadata)),
        );

        let run_result = {
            let mut conn = handle.connection().lock().await;
            match conn.run(&query.text, wire_map(&query.parameters), extra).await {
                Ok(header) => {
                    let server_agent = conn.server_agent().map(str::to_string);
                    Ok((header, server_agent))
                }
                Err(e) => Err(e),
            }
        };

        match run_result {
            Ok((header, server_agent)) => {
                let conn = handle.connection().clone();
                let fetch_size = self.fetch_size();
                // Park the connection with its pending stream; the
                // cursor re-locks it for every batch.
                handle.release().await;
                Ok(RecordCursor::new(
                    conn,
                    header,
                    fetch_size,
                    self.bookmarks.clone(),
                    server_agent,
                ))
            }
            Err(e) => {
                if e.is_cluster_error() {
                    self.provider
                        .on_cluster_error(database.as_deref(), handle.address());
                }
                handle.release().await;
                Err(e)
            }
        }
    }

    /// Open an explicit transaction in the session's access mode.
    pub async fn begin_transaction(
        &self,
        config: Option<TransactionConfig>,
    ) -> DriverResult<Transaction> {
        self.begin_with_mode(self.config.access_mode, config).await
    }

    /// Run `work` in a read transaction, retrying transient failures.
    pub async fn read_transaction<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: std::future::Future<Output = DriverResult<T>>,
    {
        self.transaction_with_retry(AccessMode::Read, work).await
    }

    /// Run `work` in a write transaction, retrying transient failures.
    pub async fn write_transaction<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: std::future::Future<Output = DriverResult<T>>,
    {
        self.transaction_with_retry(AccessMode::Write, work).await
    }

    /// The bookmarks the next transaction would send.
    pub fn last_bookmarks(&self) -> Vec<Bookmark> {
        self.bookmarks.bookmarks()
    }

    /// Close the session. Borrowed connections are already owned by
    /// their cursors or transactions; this only refuses further work.
    pub async fn close(&self) -> DriverResult<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn database(&self) -> Option<&str> {
        self.config
            .database
            .as_deref()
            .or(self.driver_config.uri.database.as_deref())
    }

    fn fetch_size(&self) -> i64 {
        self.config.fetch_size.unwrap_or(self.driver_config.fetch_size)
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DriverError::session("session is closed"))
        }
    }

    async fn begin_with_mode(
        &self,
        mode: AccessMode,
        config: Option<TransactionConfig>,
    ) -> DriverResult<Transaction> {
        self.ensure_open()?;

        let tx_config = config.unwrap_or_default();
        let bookmarks = self.bookmarks.snapshot();
        let database = self.database().map(str::to_string);
        let handle = self
            .provider
            .acquire(database.as_deref(), mode, &bookmarks)
            .await?;

        let extra = tx_extra(
            database.as_deref(),
            &bookmarks,
            mode == AccessMode::Read,
            tx_config.timeout,
            Some(&wire_map(&tx_config.metadata)),
        );

        let begin_result = {
            let mut conn = handle.connection().lock().await;
            conn.begin(extra).await
        };

        match begin_result {
            Ok(()) => Ok(Transaction::new(
                handle,
                self.bookmarks.clone(),
                self.fetch_size(),
            )),
            Err(e) => {
                if e.is_cluster_error() {
                    self.provider
                        .on_cluster_error(database.as_deref(), handle.address());
                }
                handle.release().await;
                Err(e)
            }
        }
    }

    /// The managed-transaction loop: begin, hand the transaction to the
    /// caller, and retry with backoff while the failure is transient
    /// and the time budget lasts. Cluster errors additionally
    /// invalidate the routing table so the retry lands on the new
    /// topology.
    async fn transaction_with_retry<F, Fut, T>(&self, mode: AccessMode, work: F) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: std::future::Future<Output = DriverResult<T>>,
    {
        self.ensure_open()?;

        let policy = self.driver_config.retry.clone();
        let database = self.database().map(str::to_string);
        let start = Instant::now();
        let mut delay = policy.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match self.begin_with_mode(mode, None).await {
                Ok(tx) => {
                    let address = tx.server_address().clone();
                    match work(tx).await {
                        Ok(value) => return Ok(value),
                        Err(e) => {
                            if e.is_cluster_error() {
                                self.provider.on_cluster_error(database.as_deref(), &address);
                            }
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            if !error.is_retryable() || !policy.allows_retry(start.elapsed(), delay) {
                return Err(error);
            }

            let sleep_for = policy.jittered(delay);
            debug!(
                attempt,
                error = %error,
                delay = ?sleep_for,
                "retrying managed transaction"
            );
            tokio::time::sleep(sleep_for).await;
            delay = policy.next_delay(delay);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.config.database)
            .field("access_mode", &self.config.access_mode)
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish()
    }
}

/// Convert a driver-level parameter map to its wire form.
pub(crate) fn wire_map(values: &HashMap<String, Value>) -> HashMap<String, PackValue> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_default_is_write() {
        assert_eq!(AccessMode::default(), AccessMode::Write);
    }

    #[test]
    fn bookmark_wrapping() {
        let bookmark = Bookmark::new("FB:kcwQ");
        assert_eq!(bookmark.value(), "FB:kcwQ");
        assert_eq!(bookmark.to_string(), "FB:kcwQ");

        let from_str: Bookmark = "b1".into();
        let from_string: Bookmark = String::from("b2").into();
        assert_eq!(from_str.value(), "b1");
        assert_eq!(from_string.value(), "b2");
    }

    #[test]
    fn bookmark_state_replaces_on_update() {
        let state = BookmarkState::with_initial(vec![Bookmark::new("old-1"), Bookmark::new("old-2")]);
        assert_eq!(state.snapshot(), vec!["old-1".to_string(), "old-2".to_string()]);

        state.update("new".to_string());
        assert_eq!(state.snapshot(), vec!["new".to_string()]);
        assert_eq!(state.bookmarks(), vec![Bookmark::new("new")]);
    }

    #[test]
    fn bookmark_state_is_shared_between_clones() {
        let state = BookmarkState::default();
        let clone = state.clone();
        clone.update("shared".to_string());
        assert_eq!(state.snapshot(), vec!["shared".to_string()]);
    }

    #[test]
    fn session_config_builder() {
        let config = SessionConfig::builder()
            .with_database("movies")
            .with_fetch_size(500)
            .with_read_access()
            .with_bookmark("b1")
            .build();

        assert_eq!(config.database.as_deref(), Some("movies"));
        assert_eq!(config.fetch_size, Some(500));
        assert_eq!(config.access_mode, AccessMode::Read);
        assert_eq!(config.bookmarks.len(), 1);
    }

    #[test]
    fn session_config_defaults() {
        let config = SessionConfig::default();
        assert!(config.database.is_none());
        assert!(config.fetch_size.is_none());
        assert_eq!(config.access_mode, AccessMode::Write);
        assert!(config.bookmarks.is_empty());
    }

    #[test]
    fn query_building() {
        let query = Query::new("MATCH (n) WHERE n.age > $min RETURN n")
            .with_param("min", 21i64)
            .with_timeout(Duration::from_secs(5))
            .with_metadata("app", "bifrost-tests");

        assert_eq!(query.parameters.get("min"), Some(&Value::Integer(21)));
        assert_eq!(query.timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            query.metadata.get("app"),
            Some(&Value::String("bifrost-tests".into()))
        );

        let q: Query = "RETURN 1".into();
        assert_eq!(q.text, "RETURN 1");
        let q: Query = String::from("RETURN 2").into();
        assert_eq!(q.text, "RETURN 2");
    }

    #[test]
    fn wire_map_converts_values() {
        let mut params = HashMap::new();
        params.insert("n".to_string(), Value::Integer(5));
        params.insert("s".to_string(), Value::String("x".into()));
        let wire = wire_map(&params);
        assert_eq!(wire.get("n").and_then(|v| v.as_int()), Some(5));
        assert_eq!(wire.get("s").and_then(|v| v.as_str()), Some("x"));
    }
}

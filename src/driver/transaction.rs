//! Explicit transactions.

use std::collections::HashMap;
use std::time::Duration;

use super::cursor::RecordCursor;
use super::driver::ServerAddress;
use super::error::{DriverError, DriverResult};
use super::pool::ConnectionHandle;
use super::session::{wire_map, Bookmark, BookmarkState, Query};
use super::value::Value;

/// Settings for one transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Server-side timeout; the server aborts the transaction when it
    /// runs longer.
    pub timeout: Option<Duration>,
    /// Metadata visible in server-side monitoring.
    pub metadata: HashMap<String, Value>,
}

impl TransactionConfig {
    /// Fresh default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Server-side timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Lifecycle of a transaction object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// BEGIN succeeded, COMMIT/ROLLBACK not yet sent.
    Active,
    /// COMMIT succeeded.
    Committed,
    /// ROLLBACK succeeded.
    RolledBack,
    /// A wire or server error ended the transaction.
    Failed,
}

impl TransactionState {
    /// Whether the transaction can no longer run queries.
    pub fn is_terminated(self) -> bool {
        self != TransactionState::Active
    }
}

/// An explicit transaction.
///
/// The transaction owns its pooled connection (and the pool permit
/// behind it) from BEGIN until COMMIT or ROLLBACK; every query inside
/// it reuses that one connection. Dropping a live transaction leaks no
/// connection: the pool repairs the parked state with a RESET before
/// the next handout, which also rolls the server-side transaction
/// back.
pub struct Transaction {
    handle: Option<ConnectionHandle>,
    address: ServerAddress,
    bookmarks: BookmarkState,
    fetch_size: i64,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(
        handle: ConnectionHandle,
        bookmarks: BookmarkState,
        fetch_size: i64,
    ) -> Self {
        let address = handle.address().clone();
        Self {
            handle: Some(handle),
            address,
            bookmarks,
            fetch_size,
            state: TransactionState::Active,
        }
    }

    /// Address of the server this transaction runs on.
    pub(crate) fn server_address(&self) -> &ServerAddress {
        &self.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Run a query inside the transaction.
    ///
    /// The implementation keeps one stream per connection: a still-open
    /// stream from a previous `run` is discarded before the new query
    /// starts.
    pub async fn run(
        &mut self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<RecordCursor> {
        self.ensure_active()?;

        let mut query = query.into();
        if let Some(params) = params {
            query = query.with_params(params);
        }

        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| DriverError::transaction("transaction has no connection"))?;
        let conn_arc = handle.connection().clone();

        let run_result = {
            let mut conn = conn_arc.lock().await;
            if conn.is_streaming() {
                if let Err(e) = conn.discard(-1).await {
                    self.state = TransactionState::Failed;
                    return Err(e);
                }
            }
            match conn
                .run(&query.text, wire_map(&query.parameters), HashMap::new())
                .await
            {
                Ok(header) => {
                    let server_agent = conn.server_agent().map(str::to_string);
                    Ok((header, server_agent))
                }
                Err(e) => Err(e),
            }
        };

        match run_result {
            Ok((header, server_agent)) => Ok(RecordCursor::new(
                conn_arc,
                header,
                self.fetch_size,
                self.bookmarks.clone(),
                server_agent,
            )),
            Err(e) => {
                self.state = TransactionState::Failed;
                Err(e)
            }
        }
    }

    /// Commit. The bookmark from the COMMIT SUCCESS feeds the session's
    /// causal chain.
    pub async fn commit(mut self) -> DriverResult<Option<Bookmark>> {
        self.ensure_active()?;
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DriverError::transaction("transaction has no connection"))?;

        let commit_result = {
            let mut conn = handle.connection().lock().await;
            let drained = if conn.is_streaming() {
                conn.discard(-1).await.map(|_| ())
            } else {
                Ok(())
            };
            match drained {
                Ok(()) => conn.commit().await,
                Err(e) => Err(e),
            }
        };

        match commit_result {
            Ok(bookmark) => {
                if let Some(b) = &bookmark {
                    self.bookmarks.update(b.clone());
                }
                self.state = TransactionState::Committed;
                handle.release().await;
                Ok(bookmark.map(Bookmark::new))
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                handle.release().await;
                Err(e)
            }
        }
    }

    /// Roll back.
    pub async fn rollback(mut self) -> DriverResult<()> {
        if self.state.is_terminated() {
            return Ok(());
        }
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DriverError::transaction("transaction has no connection"))?;

        let rollback_result = {
            let mut conn = handle.connection().lock().await;
            let drained = if conn.is_streaming() {
                conn.discard(-1).await.map(|_| ())
            } else {
                Ok(())
            };
            match drained {
                Ok(()) => conn.rollback().await,
                Err(e) => Err(e),
            }
        };

        match rollback_result {
            Ok(()) => {
                self.state = TransactionState::RolledBack;
                handle.release().await;
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                handle.release().await;
                Err(e)
            }
        }
    }

    /// Roll back unless already terminated.
    pub async fn close(self) -> DriverResult<()> {
        if self.state.is_terminated() {
            return Ok(());
        }
        self.rollback().await
    }

    fn ensure_active(&self) -> DriverResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(DriverError::transaction("transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(DriverError::transaction("transaction already rolled back"))
            }
            TransactionState::Failed => {
                Err(DriverError::transaction("transaction is in a failed state"))
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // A live transaction dropped without commit or rollback parks
        // its connection; the pool's RESET before the next handout
        // rolls the server side back. No wire traffic from here.
        if self.state == TransactionState::Active {
            self.state = TransactionState::RolledBack;
        }
    }
}

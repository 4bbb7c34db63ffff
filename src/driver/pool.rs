//! Per-authority connection pool.
//!
//! One pool per server address. A counting semaphore sized to
//! `max_size` bounds how many holders can have a connection checked out
//! at once; the acquisition timeout bounds how long a caller waits for
//! a permit. Connections parked with an open auto-commit stream stay in
//! the pool; before such a connection is handed to a new holder the
//! pool drains the stream so every checkout starts from `Ready`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::bolt::packstream::PackValue;

use super::connection::{Connection, ServerState};
use super::driver::{AuthToken, ServerAddress};
use super::error::{DriverError, DriverResult};
use super::uri::TlsPolicy;

/// Tuning knobs for one pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on concurrently checked-out connections.
    pub max_size: usize,
    /// How long an acquire may wait for a permit.
    pub acquisition_timeout: Duration,
    /// TCP connect plus handshake deadline.
    pub connect_timeout: Duration,
    /// Idle age beyond which a connection is probed with RESET before
    /// reuse.
    pub liveness_check_timeout: Duration,
    /// Connections older than this are not reused.
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            acquisition_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            liveness_check_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    /// Connections currently tracked by the pool.
    pub size: usize,
    /// Tracked connections not checked out.
    pub idle: usize,
    /// Tracked connections checked out.
    pub in_use: usize,
    /// Lifetime count of successful acquisitions.
    pub total_acquired: u64,
    /// Lifetime count of connections opened.
    pub total_created: u64,
    /// Lifetime count of connections closed.
    pub total_closed: u64,
    /// Lifetime count of acquisition timeouts.
    pub total_timeouts: u64,
}

struct PoolEntry {
    id: u64,
    conn: Arc<AsyncMutex<Connection>>,
    in_use: bool,
    created_at: Instant,
    last_used: Instant,
}

/// Connection pool for a single authority.
pub(crate) struct ConnectionPool {
    address: ServerAddress,
    tls: TlsPolicy,
    auth: AuthToken,
    user_agent: String,
    routing_context: Option<HashMap<String, PackValue>>,
    config: PoolConfig,
    entries: Mutex<Vec<PoolEntry>>,
    semaphore: Arc<Semaphore>,
    open: AtomicBool,
    next_id: AtomicU64,
    total_acquired: AtomicU64,
    total_created: AtomicU64,
    total_closed: AtomicU64,
    total_timeouts: AtomicU64,
}

impl ConnectionPool {
    /// New pool for `address`.
    pub(crate) fn new(
        address: ServerAddress,
        tls: TlsPolicy,
        auth: AuthToken,
        user_agent: String,
        routing_context: Option<HashMap<String, PackValue>>,
        config: PoolConfig,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_size));
        Arc::new(Self {
            address,
            tls,
            auth,
            user_agent,
            routing_context,
            config,
            entries: Mutex::new(Vec::new()),
            semaphore,
            open: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            total_acquired: AtomicU64::new(0),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        })
    }

    /// Address this pool serves.
    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Check a connection out, bounded by the acquisition timeout.
    ///
    /// Preference order: an idle `Ready` connection (liveness-probed
    /// when it sat idle too long), then any idle connection that can be
    /// repaired, then a freshly opened one.
    pub(crate) async fn acquire(self: &Arc<Self>) -> DriverResult<ConnectionHandle> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DriverError::unavailable("connection pool is closed"));
        }

        let permit = match timeout(
            self.config.acquisition_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DriverError::unavailable("connection pool is closed")),
            Err(_) => {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(DriverError::timeout(format!(
                    "no connection to {} available within {:?}",
                    self.address, self.config.acquisition_timeout
                )));
            }
        };

        loop {
            let Some((id, conn, idle_for, expired)) = self.claim_entry() else {
                break;
            };
            if expired {
                debug!(address = %self.address, id, "retiring connection past max lifetime");
                self.discard_entry(id).await;
                continue;
            }
            match self.prepare(&conn, idle_for).await {
                Ok(()) => {
                    self.total_acquired.fetch_add(1, Ordering::Relaxed);
                    return Ok(ConnectionHandle::new(self.clone(), id, conn, permit));
                }
                Err(e) => {
                    warn!(address = %self.address, error = %e, "dropping unusable pooled connection");
                    self.discard_entry(id).await;
                }
            }
        }

        let (id, conn) = self.open_connection().await?;
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionHandle::new(self.clone(), id, conn, permit))
    }

    /// Probe connectivity by acquiring and resetting one connection.
    pub(crate) async fn verify_connectivity(self: &Arc<Self>) -> DriverResult<()> {
        let handle = self.acquire().await?;
        {
            let mut conn = handle.connection().lock().await;
            conn.reset().await?;
        }
        handle.release().await;
        Ok(())
    }

    /// Close every pooled connection and refuse further acquires.
    pub(crate) async fn close(&self) {
        self.open.store(false, Ordering::Release);
        let drained: Vec<PoolEntry> = {
            let mut entries = self.entries.lock();
            entries.drain(..).collect()
        };
        for entry in drained {
            let mut conn = entry.conn.lock().await;
            conn.close().await;
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
        self.semaphore.close();
    }

    /// Snapshot the pool counters.
    pub(crate) fn metrics(&self) -> PoolMetrics {
        let entries = self.entries.lock();
        let in_use = entries.iter().filter(|e| e.in_use).count();
        PoolMetrics {
            size: entries.len(),
            idle: entries.len() - in_use,
            in_use,
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Claim an idle entry, preferring one already in `Ready`.
    ///
    /// When the pool is at capacity the claim falls back to an idle
    /// entry whose mutex is momentarily held by a parked cursor; the
    /// subsequent prepare simply waits its turn and then drains the
    /// stream.
    fn claim_entry(&self) -> Option<(u64, Arc<AsyncMutex<Connection>>, Duration, bool)> {
        let mut entries = self.entries.lock();
        let mut ready = None;
        let mut fallback = None;
        let mut busy = None;
        let mut expired = None;

        for (i, entry) in entries.iter().enumerate() {
            if entry.in_use {
                continue;
            }
            if entry.created_at.elapsed() > self.config.max_lifetime {
                if expired.is_none() {
                    expired = Some(i);
                }
                continue;
            }
            match entry.conn.try_lock() {
                Ok(guard) => match guard.state() {
                    ServerState::Ready => {
                        ready = Some(i);
                        break;
                    }
                    _ => {
                        if fallback.is_none() {
                            fallback = Some(i);
                        }
                    }
                },
                Err(_) => {
                    if busy.is_none() {
                        busy = Some(i);
                    }
                }
            }
        }

        let at_capacity = entries.len() >= self.config.max_size;
        let idx = expired
            .or(ready)
            .or(fallback)
            .or(if at_capacity { busy } else { None })?;
        let is_expired = Some(idx) == expired;
        let entry = &mut entries[idx];
        entry.in_use = true;
        Some((
            entry.id,
            entry.conn.clone(),
            entry.last_used.elapsed(),
            is_expired,
        ))
    }

    /// Bring a claimed connection to `Ready` before handing it out.
    async fn prepare(
        &self,
        conn: &Arc<AsyncMutex<Connection>>,
        idle_for: Duration,
    ) -> DriverResult<()> {
        let mut guard = conn.lock().await;
        match guard.state() {
            ServerState::Ready => {
                if idle_for >= self.config.liveness_check_timeout {
                    debug!(address = %self.address, "liveness probe after {:?} idle", idle_for);
                    guard.reset().await?;
                }
                Ok(())
            }
            ServerState::Streaming | ServerState::TxStreaming => {
                // Eager-consume: the previous holder parked an open
                // stream; drain it so this holder starts from READY.
                guard.discard(-1).await?;
                if guard.state() == ServerState::TxReady {
                    guard.reset().await?;
                }
                if guard.state() == ServerState::Ready {
                    Ok(())
                } else {
                    Err(DriverError::protocol(
                        "connection did not return to READY after drain",
                    ))
                }
            }
            ServerState::TxReady | ServerState::Failed | ServerState::Interrupted => {
                guard.reset().await
            }
            _ => Err(DriverError::protocol("connection is no longer usable")),
        }
    }

    async fn open_connection(&self) -> DriverResult<(u64, Arc<AsyncMutex<Connection>>)> {
        let mut conn =
            Connection::connect(&self.address, self.tls, self.config.connect_timeout).await?;
        conn.hello(
            &self.user_agent,
            self.auth.to_wire(),
            self.routing_context.clone(),
        )
        .await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.total_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            address = %self.address,
            id,
            version = %conn.version(),
            connection_id = conn.connection_id(),
            "opened connection"
        );

        let conn = Arc::new(AsyncMutex::new(conn));
        let now = Instant::now();
        self.entries.lock().push(PoolEntry {
            id,
            conn: conn.clone(),
            in_use: true,
            created_at: now,
            last_used: now,
        });
        Ok((id, conn))
    }

    async fn discard_entry(&self, id: u64) {
        let removed = {
            let mut entries = self.entries.lock();
            entries
                .iter()
                .position(|e| e.id == id)
                .map(|i| entries.swap_remove(i))
        };
        if let Some(entry) = removed {
            let mut conn = entry.conn.lock().await;
            conn.close().await;
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn mark_idle(&self, id: u64) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.in_use = false;
            entry.last_used = Instant::now();
        }
    }

    /// Return a connection after use.
    ///
    /// `Ready` goes back idle; `Streaming` is parked with its pending
    /// stream (the auto-commit cursor path); transaction leftovers and
    /// failures are repaired with RESET; anything unusable is closed.
    async fn release(self: &Arc<Self>, id: u64, conn: Arc<AsyncMutex<Connection>>) {
        if !self.open.load(Ordering::Acquire) {
            self.discard_entry(id).await;
            return;
        }

        let mut remove = false;
        {
            let mut guard = conn.lock().await;
            match guard.state() {
                ServerState::Ready | ServerState::Streaming => {}
                ServerState::TxReady
                | ServerState::TxStreaming
                | ServerState::Failed
                | ServerState::Interrupted => {
                    if let Err(e) = guard.reset().await {
                        warn!(address = %self.address, error = %e, "reset on release failed");
                        remove = true;
                    }
                }
                _ => remove = true,
            }
            if remove {
                guard.close().await;
            }
        }

        if remove {
            let mut entries = self.entries.lock();
            if let Some(i) = entries.iter().position(|e| e.id == id) {
                entries.swap_remove(i);
                self.total_closed.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.mark_idle(id);
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("size", &metrics.size)
            .field("idle", &metrics.idle)
            .field("in_use", &metrics.in_use)
            .finish()
    }
}

/// A checked-out connection plus the permit that backs it.
///
/// Dropping the handle returns the permit and marks the entry idle
/// without any wire traffic; the next acquire repairs whatever state
/// the connection was left in. [`ConnectionHandle::release`] is the
/// deliberate path and performs the repair eagerly.
#[derive(Debug)]
pub(crate) struct ConnectionHandle {
    pool: Arc<ConnectionPool>,
    entry_id: u64,
    conn: Arc<AsyncMutex<Connection>>,
    address: ServerAddress,
    _permit: OwnedSemaphorePermit,
    released: bool,
}

impl ConnectionHandle {
    fn new(
        pool: Arc<ConnectionPool>,
        entry_id: u64,
        conn: Arc<AsyncMutex<Connection>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let address = pool.address().clone();
        Self {
            pool,
            entry_id,
            conn,
            address,
            _permit: permit,
            released: false,
        }
    }

    /// The shared connection.
    pub(crate) fn connection(&self) -> &Arc<AsyncMutex<Connection>> {
        &self.conn
    }

    /// Address of the server this handle talks to.
    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Return the connection to the pool, repairing its state first.
    pub(crate) async fn release(mut self) {
        self.released = true;
        let pool = self.pool.clone();
        pool.release(self.entry_id, self.conn.clone()).await;
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if !self.released {
            self.pool.mark_idle(self.entry_id);
        }
    }
}

//! Lazy, demand-driven result cursor.
//!
//! A cursor reads one stream of records in order, pulling batches of
//! `fetch_size` on demand and releasing the connection the moment the
//! stream ends. It can skip forward, either within the buffered batch
//! or by discarding whole unread batches server-side, but it never
//! moves backwards.
//!
//! The cursor shares its connection with the pool rather than pinning
//! it: after the RUN the connection is parked back in the pool with the
//! stream open, and every fetch first checks that the stream epoch it
//! started under is still live. When another holder acquired the
//! connection in between, the pool drained the stream and the cursor
//! simply reports exhaustion.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use super::connection::{Connection, StreamHeader};
use super::error::{DriverError, DriverResult};
use super::record::Record;
use super::session::BookmarkState;
use super::summary::{Counters, ResultSummary};
use super::value::Value;
use crate::bolt::message::Success;

/// Streaming reader over one query result.
pub struct RecordCursor {
    conn: Arc<AsyncMutex<Connection>>,
    keys: Arc<Vec<String>>,
    epoch: u64,
    fetch_size: i64,
    buffer: VecDeque<Record>,
    /// Global index of the record at the front of the buffer.
    buffer_start: usize,
    /// Global index of the next record to yield.
    position: usize,
    /// Records received from or skipped on the server so far.
    received: usize,
    /// Batches requested so far.
    pull_count: usize,
    /// Whether the stream is still open from this cursor's view.
    open: bool,
    summary: Option<ResultSummary>,
    bookmarks: BookmarkState,
    server_agent: Option<String>,
    t_first: Option<i64>,
}

impl RecordCursor {
    pub(crate) fn new(
        conn: Arc<AsyncMutex<Connection>>,
        header: StreamHeader,
        fetch_size: i64,
        bookmarks: BookmarkState,
        server_agent: Option<String>,
    ) -> Self {
        Self {
            conn,
            keys: header.keys,
            epoch: header.epoch,
            fetch_size,
            buffer: VecDeque::new(),
            buffer_start: 0,
            position: 0,
            received: 0,
            pull_count: 0,
            open: true,
            summary: None,
            bookmarks,
            server_agent,
            t_first: header.t_first,
        }
    }

    /// The ordered field names from the RUN header.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Index of the next record [`Self::next`] would yield.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether the stream may still produce records.
    pub fn is_open(&self) -> bool {
        self.open || !self.buffer.is_empty()
    }

    /// Terminal metadata, available once the stream has ended.
    pub fn summary(&self) -> Option<&ResultSummary> {
        self.summary.as_ref()
    }

    /// Fetch the next record, pulling a fresh batch when the buffer is
    /// exhausted and the server reported more.
    pub async fn next(&mut self) -> DriverResult<Option<Record>> {
        loop {
            self.drop_skipped();
            if let Some(record) = self.buffer.pop_front() {
                self.buffer_start += 1;
                self.position += 1;
                return Ok(Some(record));
            }
            if !self.open {
                return Ok(None);
            }
            self.fetch_batch().await?;
        }
    }

    /// Skip forward so the next record yielded is the one at `target`.
    ///
    /// Whole unread batches between here and the target are discarded
    /// server-side without transferring them. Seeking backwards is not
    /// supported and is reported as an error.
    pub async fn seek(&mut self, target: usize) -> DriverResult<()> {
        if target < self.position {
            return Err(DriverError::usage(format!(
                "cannot seek backwards (position {}, target {})",
                self.position, target
            )));
        }
        if target == self.position {
            return Ok(());
        }

        let buffered_end = self.buffer_start + self.buffer.len();
        if target < buffered_end || !self.open {
            // Within the buffered window, or nothing left to skip
            // server-side; client-side trimming handles the rest.
            self.position = target;
            return Ok(());
        }

        self.buffer.clear();
        self.buffer_start = self.received;
        self.position = target;

        if self.fetch_size > 0 {
            let n = self.fetch_size as usize;
            let target_batch = target / n;
            if target_batch > self.pull_count {
                let skip = (target_batch - self.pull_count) * n;
                let meta = {
                    let mut conn = self.conn.lock().await;
                    if !conn.owns_stream(self.epoch) {
                        self.open = false;
                        return Ok(());
                    }
                    match conn.discard(skip as i64).await {
                        Ok(meta) => meta,
                        Err(e) => {
                            self.open = false;
                            return Err(e);
                        }
                    }
                };
                self.pull_count = target_batch;
                self.received += skip;
                self.buffer_start = self.received;
                if !meta.has_more() {
                    self.open = false;
                    self.finish(meta);
                }
            }
        }
        Ok(())
    }

    /// Throw away the rest of the stream and release the connection.
    pub async fn discard(&mut self) -> DriverResult<()> {
        self.buffer.clear();
        self.buffer_start = self.position;
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let meta = {
            let mut conn = self.conn.lock().await;
            if !conn.owns_stream(self.epoch) {
                return Ok(());
            }
            conn.discard(-1).await?
        };
        self.finish(meta);
        Ok(())
    }

    /// Discard the remainder and return the result summary.
    pub async fn consume(&mut self) -> DriverResult<ResultSummary> {
        self.discard().await?;
        Ok(self.summary.clone().unwrap_or_default())
    }

    /// Materialize every remaining record.
    pub async fn collect(&mut self) -> DriverResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Expect exactly one remaining record.
    pub async fn single(&mut self) -> DriverResult<Record> {
        let first = self
            .next()
            .await?
            .ok_or_else(|| DriverError::usage("expected a single record, found none"))?;
        if self.next().await?.is_some() {
            self.discard().await?;
            return Err(DriverError::usage(
                "expected a single record, found more than one",
            ));
        }
        Ok(first)
    }

    fn drop_skipped(&mut self) {
        while self.buffer_start < self.position && !self.buffer.is_empty() {
            self.buffer.pop_front();
            self.buffer_start += 1;
        }
    }

    async fn fetch_batch(&mut self) -> DriverResult<()> {
        let (rows, meta) = {
            let mut conn = self.conn.lock().await;
            if !conn.owns_stream(self.epoch) {
                // The pool handed the connection to someone else and
                // drained our stream; nothing more will arrive.
                self.open = false;
                return Ok(());
            }
            match conn.pull(self.fetch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.open = false;
                    return Err(e);
                }
            }
        };

        let converted: DriverResult<Vec<Record>> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(Value::try_from)
                    .collect::<DriverResult<Vec<_>>>()
                    .map(|values| Record::new(self.keys.clone(), values))
            })
            .collect();
        let records = match converted {
            Ok(records) => records,
            Err(e) => {
                self.open = false;
                return Err(e);
            }
        };

        self.buffer_start = self.received;
        self.received += records.len();
        self.buffer.extend(records);
        self.pull_count += 1;

        if !meta.has_more() {
            self.open = false;
            self.finish(meta);
        }
        Ok(())
    }

    fn finish(&mut self, meta: Success) {
        if let Some(bookmark) = meta.bookmark() {
            self.bookmarks.update(bookmark.to_string());
        }
        let counters = meta.stats().map(Counters::from_stats).unwrap_or_default();
        self.summary = Some(ResultSummary {
            counters,
            bookmark: meta.bookmark().map(str::to_string),
            database: meta.db().map(str::to_string),
            t_first: self.t_first,
            t_last: meta.t_last(),
            server_agent: self.server_agent.clone(),
        });
    }
}

impl std::fmt::Debug for RecordCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCursor")
            .field("keys", &self.keys)
            .field("position", &self.position)
            .field("buffered", &self.buffer.len())
            .field("open", &self.open)
            .finish()
    }
}

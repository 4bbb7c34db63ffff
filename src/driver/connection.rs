//! One Bolt connection and its server-state machine.
//!
//! A connection is a strictly sequential conversation: one request goes
//! out, its responses are read back, and the tracked server state moves
//! exactly as the protocol's transition table dictates. Any socket
//! fault makes the connection defunct and it is never reused; a server
//! FAILURE parks it in the failed state until a RESET recovers it.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::bolt::chunk::ChunkCodec;
use crate::bolt::handshake::{self, BoltVersion};
use crate::bolt::message::{Begin, Demand, Hello, Request, Response, Route, Run, Success};
use crate::bolt::packstream::PackValue;

use super::driver::ServerAddress;
use super::error::{DriverError, DriverResult};
use super::routing::RoutingTable;
use super::tls::BoltStream;
use super::uri::TlsPolicy;

/// Server-side state of a Bolt connection, as tracked by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No socket yet.
    Disconnected,
    /// Socket and handshake done, HELLO not yet accepted.
    Connected,
    /// Authenticated and idle.
    Ready,
    /// An auto-commit result stream is open.
    Streaming,
    /// Inside an explicit transaction, no open stream.
    TxReady,
    /// Inside an explicit transaction with an open stream.
    TxStreaming,
    /// The server reported a FAILURE; everything but RESET is ignored.
    Failed,
    /// A RESET is in flight.
    Interrupted,
    /// The connection is unusable and must be closed.
    Defunct,
}

/// Header of a freshly started result stream.
#[derive(Debug, Clone)]
pub(crate) struct StreamHeader {
    /// Field names announced by the RUN SUCCESS.
    pub keys: Arc<Vec<String>>,
    /// Stream handle on protocols that assign one.
    pub qid: Option<i64>,
    /// Milliseconds until the first record was available.
    pub t_first: Option<i64>,
    /// Stream epoch; cursors use it to detect that the pool drained
    /// their stream out from under them.
    pub epoch: u64,
}

/// A live Bolt connection.
pub(crate) struct Connection {
    stream: BoltStream,
    codec: ChunkCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    address: ServerAddress,
    version: BoltVersion,
    state: ServerState,
    server_agent: Option<String>,
    connection_id: Option<String>,
    qid: Option<i64>,
    epoch: u64,
}

impl Connection {
    /// Open a socket, wrap it per the TLS policy and run the handshake.
    ///
    /// The connection comes back in the `Connected` state; [`Self::hello`]
    /// completes initialisation.
    pub(crate) async fn connect(
        address: &ServerAddress,
        tls: TlsPolicy,
        connect_timeout: Duration,
    ) -> DriverResult<Self> {
        let tcp = timeout(
            connect_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| DriverError::timeout(format!("connecting to {} timed out", address)))??;
        tcp.set_nodelay(true).ok();

        let mut stream = BoltStream::wrap(tcp, tls, &address.host).await?;

        stream.write_all(&handshake::build_handshake()).await?;
        stream.flush().await?;
        let mut reply = [0u8; handshake::HANDSHAKE_REPLY_LEN];
        stream.read_exact(&mut reply).await?;

        let version = match handshake::parse_handshake_reply(reply) {
            Ok(Some(version)) => version,
            Ok(None) => {
                let _ = stream.shutdown().await;
                return Err(DriverError::protocol(
                    "server accepted none of the proposed Bolt versions",
                ));
            }
            Err(raw) => {
                let _ = stream.shutdown().await;
                return Err(DriverError::protocol(format!(
                    "server answered handshake with unknown version word 0x{:08X}",
                    raw
                )));
            }
        };

        debug!(address = %address, version = %version, "bolt handshake complete");

        Ok(Self {
            stream,
            codec: ChunkCodec::new(),
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(8192),
            address: address.clone(),
            version,
            state: ServerState::Connected,
            server_agent: None,
            connection_id: None,
            qid: None,
            epoch: 0,
        })
    }

    /// Authenticate. Moves `Connected` to `Ready`; a FAILURE closes the
    /// socket for good.
    pub(crate) async fn hello(
        &mut self,
        user_agent: &str,
        auth: HashMap<String, PackValue>,
        routing: Option<HashMap<String, PackValue>>,
    ) -> DriverResult<()> {
        self.guard("HELLO", &[ServerState::Connected])?;

        let mut hello = Hello::new(user_agent).with_auth(auth);
        if self.version.supports_hello_routing() {
            if let Some(context) = routing {
                hello = hello.with_routing(context);
            }
        }

        self.write_message(Request::Hello(hello)).await?;
        match self.read_message().await? {
            Response::Success(meta) => {
                self.server_agent = meta.server().map(str::to_string);
                self.connection_id = meta.connection_id().map(str::to_string);
                self.state = ServerState::Ready;
                Ok(())
            }
            Response::Failure(f) => {
                let _ = self.stream.shutdown().await;
                self.state = ServerState::Defunct;
                Err(f.into())
            }
            other => Err(self.defunct_protocol(format!(
                "unexpected {} in response to HELLO",
                other.name()
            ))),
        }
    }

    /// Start a query. From `Ready` this opens an auto-commit stream;
    /// inside a transaction it opens (or replaces) the tx stream.
    pub(crate) async fn run(
        &mut self,
        query: &str,
        parameters: HashMap<String, PackValue>,
        extra: HashMap<String, PackValue>,
    ) -> DriverResult<StreamHeader> {
        self.guard(
            "RUN",
            &[
                ServerState::Ready,
                ServerState::TxReady,
                ServerState::TxStreaming,
            ],
        )?;

        let request = Request::Run(Run::new(query).with_parameters(parameters).with_extra(extra));
        self.write_message(request).await?;
        match self.read_message().await? {
            Response::Success(meta) => {
                self.note_stream_closed();
                self.qid = meta.qid();
                self.state = match self.state {
                    ServerState::Ready => ServerState::Streaming,
                    _ => ServerState::TxStreaming,
                };
                Ok(StreamHeader {
                    keys: Arc::new(meta.fields().unwrap_or_default()),
                    qid: self.qid,
                    t_first: meta.t_first(),
                    epoch: self.epoch,
                })
            }
            Response::Failure(f) => Err(self.server_failure(f)),
            Response::Ignored => Err(self.ignored("RUN")),
            Response::Record(_) => Err(self.defunct_protocol("RECORD before RUN completed")),
        }
    }

    /// Pull up to `n` records (-1 for all) from the open stream.
    ///
    /// Returns the raw rows and the summarising SUCCESS. When the
    /// SUCCESS does not announce `has_more`, the stream is finished and
    /// the state drops back to `Ready` (or `TxReady` inside a
    /// transaction).
    pub(crate) async fn pull(&mut self, n: i64) -> DriverResult<(Vec<Vec<PackValue>>, Success)> {
        self.guard("PULL", &[ServerState::Streaming, ServerState::TxStreaming])?;

        let request = if self.version.supports_qid() {
            Request::Pull(Demand { n, qid: self.qid })
        } else {
            // Pre-4.0 servers only understand PULL_ALL.
            Request::PullAll
        };
        self.write_message(request).await?;

        let mut rows = Vec::new();
        loop {
            match self.read_message().await? {
                Response::Record(fields) => rows.push(fields),
                Response::Success(meta) => {
                    if !meta.has_more() {
                        self.finish_stream();
                    }
                    return Ok((rows, meta));
                }
                Response::Failure(f) => return Err(self.server_failure(f)),
                Response::Ignored => return Err(self.ignored("PULL")),
            }
        }
    }

    /// Discard up to `n` records (-1 for the remainder) from the open
    /// stream without transferring them.
    pub(crate) async fn discard(&mut self, n: i64) -> DriverResult<Success> {
        self.guard(
            "DISCARD",
            &[ServerState::Streaming, ServerState::TxStreaming],
        )?;

        let request = if self.version.supports_qid() {
            Request::Discard(Demand { n, qid: self.qid })
        } else {
            Request::DiscardAll
        };
        self.write_message(request).await?;

        match self.read_message().await? {
            Response::Success(meta) => {
                if !meta.has_more() {
                    self.finish_stream();
                }
                Ok(meta)
            }
            Response::Failure(f) => Err(self.server_failure(f)),
            Response::Ignored => Err(self.ignored("DISCARD")),
            Response::Record(_) => Err(self.defunct_protocol("RECORD in response to DISCARD")),
        }
    }

    /// Open an explicit transaction.
    pub(crate) async fn begin(&mut self, extra: HashMap<String, PackValue>) -> DriverResult<()> {
        self.guard("BEGIN", &[ServerState::Ready])?;

        self.write_message(Request::Begin(Begin::new(extra))).await?;
        match self.read_message().await? {
            Response::Success(_) => {
                self.state = ServerState::TxReady;
                Ok(())
            }
            Response::Failure(f) => Err(self.server_failure(f)),
            Response::Ignored => Err(self.ignored("BEGIN")),
            Response::Record(_) => Err(self.defunct_protocol("RECORD in response to BEGIN")),
        }
    }

    /// Commit the open transaction; returns the new bookmark.
    pub(crate) async fn commit(&mut self) -> DriverResult<Option<String>> {
        self.guard("COMMIT", &[ServerState::TxReady])?;

        self.write_message(Request::Commit).await?;
        match self.read_message().await? {
            Response::Success(meta) => {
                self.state = ServerState::Ready;
                Ok(meta.bookmark().map(str::to_string))
            }
            Response::Failure(f) => Err(self.server_failure(f)),
            Response::Ignored => Err(self.ignored("COMMIT")),
            Response::Record(_) => Err(self.defunct_protocol("RECORD in response to COMMIT")),
        }
    }

    /// Roll back the open transaction.
    pub(crate) async fn rollback(&mut self) -> DriverResult<()> {
        self.guard("ROLLBACK", &[ServerState::TxReady])?;

        self.write_message(Request::Rollback).await?;
        match self.read_message().await? {
            Response::Success(_) => {
                self.state = ServerState::Ready;
                Ok(())
            }
            Response::Failure(f) => Err(self.server_failure(f)),
            Response::Ignored => Err(self.ignored("ROLLBACK")),
            Response::Record(_) => Err(self.defunct_protocol("RECORD in response to ROLLBACK")),
        }
    }

    /// Drop whatever the connection was doing and return it to `Ready`.
    ///
    /// A failed RESET leaves the connection defunct.
    pub(crate) async fn reset(&mut self) -> DriverResult<()> {
        match self.state {
            ServerState::Disconnected | ServerState::Connected => {
                return Err(DriverError::protocol("RESET before HELLO"));
            }
            ServerState::Defunct => {
                return Err(DriverError::protocol("connection is defunct"));
            }
            _ => {}
        }

        self.note_stream_closed();
        self.state = ServerState::Interrupted;
        self.write_message(Request::Reset).await?;
        loop {
            match self.read_message().await? {
                Response::Success(_) => {
                    self.state = ServerState::Ready;
                    return Ok(());
                }
                // Stragglers from the interrupted work; drop them.
                Response::Record(_) | Response::Ignored => continue,
                Response::Failure(f) => {
                    let _ = self.stream.shutdown().await;
                    self.state = ServerState::Defunct;
                    return Err(f.into());
                }
            }
        }
    }

    /// Fetch the routing table for `database`.
    ///
    /// Uses the ROUTE message from 4.3 on and falls back to the routing
    /// procedure on older protocols.
    pub(crate) async fn route(
        &mut self,
        context: HashMap<String, PackValue>,
        bookmarks: Vec<String>,
        database: Option<&str>,
    ) -> DriverResult<RoutingTable> {
        self.guard("ROUTE", &[ServerState::Ready])?;

        if self.version.supports_route_message() {
            let request = Request::Route(Route::new(
                context,
                bookmarks,
                database.map(str::to_string),
            ));
            self.write_message(request).await?;
            match self.read_message().await? {
                Response::Success(meta) => {
                    let table = meta.routing_table().ok_or_else(|| {
                        DriverError::protocol("ROUTE SUCCESS carried no routing table")
                    })?;
                    RoutingTable::from_wire(table, database)
                }
                Response::Failure(f) => Err(self.server_failure(f)),
                Response::Ignored => Err(self.ignored("ROUTE")),
                Response::Record(_) => Err(self.defunct_protocol("RECORD in response to ROUTE")),
            }
        } else {
            let (query, parameters) = legacy_route_call(self.version, context, database);
            let header = self.run(&query, parameters, HashMap::new()).await?;
            let (rows, _) = self.pull(-1).await?;
            RoutingTable::from_procedure(&header.keys, rows, database)
        }
    }

    /// Close the connection, sending GOODBYE when the state allows it.
    ///
    /// GOODBYE is only valid from `Ready`; from any other live state a
    /// RESET is attempted first.
    pub(crate) async fn close(&mut self) {
        match self.state {
            ServerState::Ready => {
                let _ = self.write_message(Request::Goodbye).await;
            }
            ServerState::Streaming
            | ServerState::TxReady
            | ServerState::TxStreaming
            | ServerState::Failed
            | ServerState::Interrupted => {
                if self.reset().await.is_ok() {
                    let _ = self.write_message(Request::Goodbye).await;
                }
            }
            _ => {}
        }
        let _ = self.stream.shutdown().await;
        self.note_stream_closed();
        self.state = ServerState::Defunct;
    }

    /// Tracked server state.
    pub(crate) fn state(&self) -> ServerState {
        self.state
    }

    /// Negotiated protocol version.
    pub(crate) fn version(&self) -> BoltVersion {
        self.version
    }

    /// Server agent string from the HELLO exchange.
    pub(crate) fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    /// Server-assigned connection id.
    pub(crate) fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Whether a result stream is open.
    pub(crate) fn is_streaming(&self) -> bool {
        matches!(
            self.state,
            ServerState::Streaming | ServerState::TxStreaming
        )
    }

    /// Whether the stream started under `epoch` is still the live one.
    pub(crate) fn owns_stream(&self, epoch: u64) -> bool {
        self.is_streaming() && self.epoch == epoch
    }

    fn guard(&self, op: &'static str, allowed: &[ServerState]) -> DriverResult<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        if self.state == ServerState::Failed {
            Err(DriverError::protocol(format!(
                "{} not allowed while the connection is FAILED; RESET first",
                op
            )))
        } else {
            Err(DriverError::protocol(format!(
                "{} not allowed in state {:?}",
                op, self.state
            )))
        }
    }

    fn note_stream_closed(&mut self) {
        if self.is_streaming() || self.qid.is_some() {
            self.qid = None;
            self.epoch += 1;
        }
    }

    fn finish_stream(&mut self) {
        let in_tx = self.state == ServerState::TxStreaming;
        self.note_stream_closed();
        self.state = if in_tx {
            ServerState::TxReady
        } else {
            ServerState::Ready
        };
    }

    fn server_failure(&mut self, failure: crate::bolt::message::Failure) -> DriverError {
        debug!(code = %failure.code, "server failure");
        self.note_stream_closed();
        self.state = ServerState::Failed;
        failure.into()
    }

    fn ignored(&mut self, op: &'static str) -> DriverError {
        self.note_stream_closed();
        self.state = ServerState::Failed;
        DriverError::protocol(format!(
            "{} was ignored by the server; connection needs RESET",
            op
        ))
    }

    fn defunct_protocol(&mut self, msg: impl Into<String>) -> DriverError {
        self.note_stream_closed();
        self.state = ServerState::Defunct;
        DriverError::protocol(msg)
    }

    fn defunct_io(&mut self, err: io::Error) -> DriverError {
        self.note_stream_closed();
        self.state = ServerState::Defunct;
        DriverError::Io(err)
    }

    async fn write_message(&mut self, request: Request) -> DriverResult<()> {
        debug!(message = request.name(), state = ?self.state, "send");
        let value = PackValue::Structure(request.to_structure());
        self.write_buf.clear();
        self.codec
            .encode(value, &mut self.write_buf)
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        let buf = self.write_buf.split();
        match self.stream.write_all(&buf).await {
            Ok(()) => {}
            Err(e) => return Err(self.defunct_io(e)),
        }
        match self.stream.flush().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.defunct_io(e)),
        }
    }

    async fn read_message(&mut self) -> DriverResult<Response> {
        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(PackValue::Structure(s))) => {
                    let response = match Response::from_structure(&s) {
                        Ok(r) => r,
                        Err(e) => return Err(self.defunct_protocol(e.to_string())),
                    };
                    debug!(message = response.name(), "recv");
                    return Ok(response);
                }
                Ok(Some(other)) => {
                    return Err(self.defunct_protocol(format!(
                        "message payload is {}, not a structure",
                        other.type_name()
                    )));
                }
                Ok(None) => {
                    let n = match self.stream.read_buf(&mut self.read_buf).await {
                        Ok(n) => n,
                        Err(e) => return Err(self.defunct_io(e)),
                    };
                    if n == 0 {
                        return Err(self.defunct_io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by server",
                        )));
                    }
                }
                Err(e) => {
                    self.note_stream_closed();
                    self.state = ServerState::Defunct;
                    return Err(e.into());
                }
            }
        }
    }
}

fn legacy_route_call(
    version: BoltVersion,
    context: HashMap<String, PackValue>,
    database: Option<&str>,
) -> (String, HashMap<String, PackValue>) {
    let mut parameters = HashMap::new();
    parameters.insert("context".to_string(), PackValue::Map(context));
    if version.supports_qid() {
        parameters.insert(
            "database".to_string(),
            match database {
                Some(db) => PackValue::String(db.to_string()),
                None => PackValue::Null,
            },
        );
        (
            "CALL dbms.routing.getRoutingTable($context, $database)".to_string(),
            parameters,
        )
    } else {
        (
            "CALL dbms.cluster.routing.getRoutingTable($context)".to_string(),
            parameters,
        )
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_route_call_by_version() {
        let (query, params) = legacy_route_call(BoltVersion::V4_1, HashMap::new(), Some("movies"));
        assert!(query.contains("dbms.routing.getRoutingTable"));
        assert_eq!(
            params.get("database").and_then(|v| v.as_str()),
            Some("movies")
        );

        let (query, params) = legacy_route_call(BoltVersion::V3_0, HashMap::new(), None);
        assert!(query.contains("dbms.cluster.routing.getRoutingTable"));
        assert!(!params.contains_key("database"));
        assert!(params.contains_key("context"));
    }

    #[test]
    fn server_states_are_distinct() {
        let states = [
            ServerState::Disconnected,
            ServerState::Connected,
            ServerState::Ready,
            ServerState::Streaming,
            ServerState::TxReady,
            ServerState::TxStreaming,
            ServerState::Failed,
            ServerState::Interrupted,
            ServerState::Defunct,
        ];
        for (i, a) in states.iter().enumerate() {
            for (j, b) in states.iter().enumerate() {
                assert_eq!(i == j, a == b);
            }
        }
    }
}

//! Scripted Bolt server for driver tests.
//!
//! Each test spawns a listener and plays the server side of the
//! conversation explicitly: read a request, assert its shape, answer.
//! The fixture reuses the crate's own message layer, so both encode and
//! decode directions of every message type get exercised.

use std::future::Future;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Decoder, Encoder};

use bifrost_driver::bolt::message::request::{Begin, Demand, Hello, Route, Run};
use bifrost_driver::bolt::message::{Failure, Request, Response, Success};
use bifrost_driver::bolt::{ChunkCodec, PackValue};

/// Server side of one Bolt connection.
pub struct BoltPeer {
    stream: TcpStream,
    codec: ChunkCodec,
    inbound: BytesMut,
    outbound: BytesMut,
}

impl BoltPeer {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            codec: ChunkCodec::new(),
            inbound: BytesMut::with_capacity(4096),
            outbound: BytesMut::with_capacity(4096),
        }
    }

    /// Accept the client handshake, answering with Bolt 4.4.
    pub async fn handshake(&mut self) {
        let mut buf = [0u8; 20];
        self.stream.read_exact(&mut buf).await.expect("handshake read");
        assert_eq!(&buf[..4], &[0x60, 0x60, 0xB0, 0x17], "bad magic");
        self.stream
            .write_all(&[0x00, 0x04, 0x00, 0x04])
            .await
            .expect("handshake write");
    }

    /// Read the next request.
    pub async fn recv(&mut self) -> Request {
        loop {
            if let Some(value) = self.codec.decode(&mut self.inbound).expect("frame decode") {
                let structure = match value {
                    PackValue::Structure(s) => s,
                    other => panic!("expected structure, got {:?}", other),
                };
                return Request::from_structure(&structure).expect("request decode");
            }
            let n = self
                .stream
                .read_buf(&mut self.inbound)
                .await
                .expect("socket read");
            assert!(n > 0, "client closed the connection mid-conversation");
        }
    }

    /// Send one response.
    pub async fn send(&mut self, response: Response) {
        self.outbound.clear();
        self.codec
            .encode(PackValue::Structure(response.to_structure()), &mut self.outbound)
            .expect("frame encode");
        self.stream
            .write_all(&self.outbound)
            .await
            .expect("socket write");
        self.stream.flush().await.expect("socket flush");
    }

    /// Send a SUCCESS with the given metadata entries.
    pub async fn send_success(&mut self, entries: Vec<(&str, PackValue)>) {
        let mut success = Success::new();
        for (key, value) in entries {
            success.set(key, value);
        }
        self.send(Response::Success(success)).await;
    }

    /// Send one RECORD per row, then a SUCCESS.
    pub async fn send_records(
        &mut self,
        rows: Vec<Vec<PackValue>>,
        terminal: Vec<(&str, PackValue)>,
    ) {
        for row in rows {
            self.send(Response::Record(row)).await;
        }
        self.send_success(terminal).await;
    }

    /// Send a FAILURE.
    pub async fn send_failure(&mut self, code: &str, message: &str) {
        self.send(Response::Failure(Failure::new(code, message))).await;
    }

    /// Expect a HELLO and answer it.
    pub async fn expect_hello(&mut self) -> Hello {
        match self.recv().await {
            Request::Hello(hello) => {
                self.send_success(vec![
                    ("server", PackValue::String("Neo4j/4.4.0".into())),
                    ("connection_id", PackValue::String("bolt-test-1".into())),
                ])
                .await;
                hello
            }
            other => panic!("expected HELLO, got {}", other.name()),
        }
    }

    /// Expect a RUN without answering.
    pub async fn expect_run(&mut self) -> Run {
        match self.recv().await {
            Request::Run(run) => run,
            other => panic!("expected RUN, got {}", other.name()),
        }
    }

    /// Expect a PULL without answering.
    pub async fn expect_pull(&mut self) -> Demand {
        match self.recv().await {
            Request::Pull(demand) => demand,
            other => panic!("expected PULL, got {}", other.name()),
        }
    }

    /// Expect a DISCARD without answering.
    pub async fn expect_discard(&mut self) -> Demand {
        match self.recv().await {
            Request::Discard(demand) => demand,
            other => panic!("expected DISCARD, got {}", other.name()),
        }
    }

    /// Expect a BEGIN without answering.
    pub async fn expect_begin(&mut self) -> Begin {
        match self.recv().await {
            Request::Begin(begin) => begin,
            other => panic!("expected BEGIN, got {}", other.name()),
        }
    }

    /// Expect a RESET and acknowledge it.
    pub async fn expect_reset(&mut self) {
        match self.recv().await {
            Request::Reset => self.send_success(vec![]).await,
            other => panic!("expected RESET, got {}", other.name()),
        }
    }

    /// Expect a ROUTE without answering.
    pub async fn expect_route(&mut self) -> Route {
        match self.recv().await {
            Request::Route(route) => route,
            other => panic!("expected ROUTE, got {}", other.name()),
        }
    }
}

/// Build the `rt` metadata for a ROUTE SUCCESS.
pub fn routing_table(
    ttl: i64,
    routers: &[&str],
    writers: &[&str],
    readers: &[&str],
) -> PackValue {
    let entry = |role: &str, addrs: &[&str]| {
        let mut m = std::collections::HashMap::new();
        m.insert("role".to_string(), PackValue::String(role.to_string()));
        m.insert(
            "addresses".to_string(),
            PackValue::List(
                addrs
                    .iter()
                    .map(|a| PackValue::String((*a).to_string()))
                    .collect(),
            ),
        );
        PackValue::Map(m)
    };

    let mut rt = std::collections::HashMap::new();
    rt.insert("ttl".to_string(), PackValue::Integer(ttl));
    rt.insert(
        "servers".to_string(),
        PackValue::List(vec![
            entry("ROUTE", routers),
            entry("WRITE", writers),
            entry("READ", readers),
        ]),
    );
    PackValue::Map(rt)
}

/// Spawn a listener that serves `connections` sequential connections,
/// handing each to `handler` after the handshake. Returns `host:port`.
pub async fn spawn_server<F, Fut>(connections: usize, handler: F) -> String
where
    F: Fn(usize, BoltPeer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        for i in 0..connections {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            stream.set_nodelay(true).ok();
            let mut peer = BoltPeer::new(stream);
            peer.handshake().await;
            handler(i, peer).await;
        }
    });

    format!("127.0.0.1:{}", addr.port())
}

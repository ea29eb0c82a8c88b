//! Common test helpers and utilities
//!
//! Integration tests run a real `ChatServer` on a random loopback port and
//! talk to it through framed TCP clients.

#![allow(dead_code)]

use parking_lot::Mutex;
use relaychat::network::{Connection, FrameReader};
use relaychat::protocol::handshake_payload;
use relaychat::{ChatServer, ServerConfig, ServerEvent, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// How long to listen before concluding nothing will arrive
pub const QUIET: Duration = Duration::from_millis(150);

/// Frame size limit used by test clients
pub const MAX_FRAME: usize = 64 * 1024;

/// A running server plus everything a test needs to observe it
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub events: Arc<Mutex<Vec<ServerEvent>>>,
    shutdown: CancellationToken,
    handle: JoinHandle<relaychat::Result<()>>,
}

impl TestServer {
    /// Start a server with default limits on a random loopback port
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    /// Start a server with the given limits on a random loopback port
    pub async fn start_with(config: ServerConfig) -> Self {
        let config = config.with_listen_addr("127.0.0.1:0".parse().unwrap());
        let server = ChatServer::bind(config).await.unwrap();

        let addr = server.local_addr().unwrap();
        let registry = Arc::clone(server.registry());
        let shutdown = server.shutdown_token();

        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        server.on_event(move |event| events_clone.lock().push(event));

        let handle = tokio::spawn(server.run());

        Self {
            addr,
            registry,
            events,
            shutdown,
            handle,
        }
    }

    /// Wait until `pred` holds for some recorded event
    pub async fn wait_for_event(&self, pred: impl Fn(&ServerEvent) -> bool) {
        self.wait_until(|| self.events.lock().iter().any(&pred)).await;
    }

    /// Wait until `count` sessions are registered
    pub async fn wait_for_sessions(&self, count: usize) {
        self.wait_until(|| self.registry.len() == count).await;
    }

    /// Number of `Joined` events seen so far
    pub fn joined_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ServerEvent::Joined { .. }))
            .count()
    }

    async fn wait_until(&self, cond: impl Fn() -> bool) {
        timeout(WAIT, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Cancel the server and wait for it to drain
    pub async fn stop(self) {
        self.shutdown.cancel();
        timeout(WAIT, self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// A framed TCP client speaking the wire protocol directly
pub struct RawClient {
    pub reader: FrameReader,
    pub conn: Arc<Connection>,
}

impl RawClient {
    /// Connect to the server and wait until it has registered us
    pub async fn connect(server: &TestServer) -> Self {
        let before = server.registry.len();
        let (reader, conn) = Connection::connect(server.addr, MAX_FRAME).await.unwrap();
        server.wait_for_sessions(before + 1).await;
        Self { reader, conn }
    }

    /// Connect and complete the handshake as `name`
    pub async fn join(server: &TestServer, name: &str) -> Self {
        let client = Self::connect(server).await;
        let joined = server.joined_count();
        client.send(&handshake_payload(name)).await;
        server.wait_until(|| server.joined_count() > joined).await;
        client
    }

    /// Send one frame
    pub async fn send(&self, payload: &[u8]) {
        self.conn.send_frame(payload).await.unwrap();
    }

    /// Receive the next frame as text, failing the test if none arrives
    pub async fn recv(&mut self) -> String {
        let frame = timeout(WAIT, self.reader.next_frame())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed while waiting for a frame");
        String::from_utf8(frame).unwrap()
    }

    /// Assert nothing arrives for a short while
    pub async fn expect_silence(&mut self) {
        if let Ok(frame) = timeout(QUIET, self.reader.next_frame()).await {
            panic!("expected silence, got {:?}", frame);
        }
    }

    /// Assert the server closes the connection, skipping any frames still queued
    pub async fn expect_closed(&mut self) {
        timeout(WAIT, async {
            loop {
                match self.reader.next_frame().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) if e.is_peer_closed() => break,
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        })
        .await
        .expect("connection was not closed");
    }
}

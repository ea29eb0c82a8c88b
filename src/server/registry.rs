//! Registry of live chat sessions
//!
//! The registry is the only structure shared by every session task. Set
//! mutation happens under a write lock. Broadcasts only enqueue onto each
//! recipient's outbound queue under a read lock and never touch a socket, so
//! a slow recipient can stall neither the sender nor the rest of the server.

use crate::error::{ChatError, TransportError};
use crate::network::Connection;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a session, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of this identifier
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Proof of registration, used to unregister and to exclude the sender
/// from its own broadcasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryHandle {
    id: SessionId,
}

impl RegistryHandle {
    /// Session this handle refers to
    pub fn id(&self) -> SessionId {
        self.id
    }
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients the frame was queued for
    pub delivered: usize,
    /// Recipients that were closed or too far behind to take the frame
    pub failed: usize,
}

/// Set of live sessions with fan-out broadcast
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Connection>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered. Ids come from
    /// [`SessionId::next`], so a duplicate means a session was registered
    /// twice.
    pub fn register(&self, id: SessionId, connection: Arc<Connection>) -> RegistryHandle {
        let previous = self.sessions.write().insert(id, connection);
        assert!(previous.is_none(), "session {} registered twice", id);

        RegistryHandle { id }
    }

    /// Remove a session
    ///
    /// Returns `true` if the session was present. Removing an already removed
    /// session is a no-op.
    pub fn unregister(&self, handle: &RegistryHandle) -> bool {
        self.sessions.write().remove(&handle.id).is_some()
    }

    /// Whether the session is still registered
    pub fn contains(&self, handle: &RegistryHandle) -> bool {
        self.sessions.read().contains_key(&handle.id)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Ids of all registered sessions, in no particular order
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }

    /// Send `payload` to every registered session except `sender`
    ///
    /// Membership is fixed for the call: the whole fan-out happens under one
    /// read lock, so a session registered or removed concurrently is either
    /// fully included or fully excluded. The frame is queued on each
    /// recipient's connection without waiting. A recipient that is closed,
    /// or whose queue is full, misses this frame and counts as failed. It is
    /// not removed; its own session task notices a broken connection and
    /// unregisters itself.
    pub fn broadcast_except(&self, sender: &RegistryHandle, payload: &[u8]) -> BroadcastReport {
        let frame: Arc<[u8]> = Arc::from(payload);
        let mut report = BroadcastReport::default();

        let sessions = self.sessions.read();
        for (id, conn) in sessions.iter().filter(|(id, _)| **id != sender.id) {
            match conn.try_send_frame(&frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    if let ChatError::Transport(TransportError::QueueFull { .. }) = e {
                        warn!(
                            session_id = %id,
                            peer = %conn.peer_addr(),
                            error = %e,
                            "Dropping broadcast for slow recipient"
                        );
                    } else {
                        debug!(
                            session_id = %id,
                            peer = %conn.peer_addr(),
                            error = %e,
                            "Broadcast send failed"
                        );
                    }
                },
            }
        }

        report
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{read_frame, FrameReader};
    use std::net::SocketAddr;
    use tokio::io::{duplex, split, DuplexStream};

    const MAX: usize = 1024;

    /// A registered-ready connection plus the client's end of its pipe
    struct TestPeer {
        id: SessionId,
        conn: Arc<Connection>,
        _reader: FrameReader,
        client: DuplexStream,
    }

    fn test_peer() -> TestPeer {
        let (server_side, client_side) = duplex(4096);
        let (read_half, write_half) = split(server_side);
        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let (reader, conn) =
            Connection::from_parts(Box::new(read_half), Box::new(write_half), addr, MAX);

        TestPeer {
            id: SessionId::next(),
            conn,
            _reader: reader,
            client: client_side,
        }
    }

    async fn wait_until_closed(conn: &Connection) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while conn.state() != crate::network::ConnectionState::Closed {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection never closed");
    }

    async fn try_recv(peer: &mut TestPeer) -> Option<Vec<u8>> {
        tokio::time::timeout(
            std::time::Duration::from_millis(50),
            read_frame(&mut peer.client, MAX),
        )
        .await
        .ok()
        .and_then(|r| r.ok())
        .flatten()
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(a.to_string(), format!("#{}", a.as_u64()));
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = SessionRegistry::new();
        let peer = test_peer();

        assert!(registry.is_empty());
        let handle = registry.register(peer.id, Arc::clone(&peer.conn));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&handle));
        assert_eq!(registry.session_ids(), vec![peer.id]);

        assert!(registry.unregister(&handle));
        assert!(registry.is_empty());
        assert!(!registry.contains(&handle));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let a = test_peer();
        let b = test_peer();

        let handle_a = registry.register(a.id, Arc::clone(&a.conn));
        let _handle_b = registry.register(b.id, Arc::clone(&b.conn));

        assert!(registry.unregister(&handle_a));
        let after_once = registry.session_ids();

        assert!(!registry.unregister(&handle_a));
        assert_eq!(registry.session_ids(), after_once);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    #[should_panic(expected = "registered twice")]
    async fn test_duplicate_registration_panics() {
        let registry = SessionRegistry::new();
        let peer = test_peer();

        registry.register(peer.id, Arc::clone(&peer.conn));
        registry.register(peer.id, Arc::clone(&peer.conn));
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = SessionRegistry::new();
        let mut a = test_peer();
        let mut b = test_peer();
        let mut c = test_peer();

        let handle_a = registry.register(a.id, Arc::clone(&a.conn));
        registry.register(b.id, Arc::clone(&b.conn));
        registry.register(c.id, Arc::clone(&c.conn));

        let report = registry.broadcast_except(&handle_a, b"hello");
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 2,
                failed: 0
            }
        );

        assert_eq!(try_recv(&mut b).await.as_deref(), Some(&b"hello"[..]));
        assert_eq!(try_recv(&mut c).await.as_deref(), Some(&b"hello"[..]));
        assert_eq!(try_recv(&mut a).await, None);
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failed_recipient() {
        let registry = SessionRegistry::new();
        let a = test_peer();
        let b = test_peer();
        let mut c = test_peer();

        let handle_a = registry.register(a.id, Arc::clone(&a.conn));
        let handle_b = registry.register(b.id, Arc::clone(&b.conn));
        registry.register(c.id, Arc::clone(&c.conn));

        // Break B's connection by dropping the client end of its pipe
        drop(b.client);

        // The first frame is queued for B; its writer then hits the broken pipe
        registry.broadcast_except(&handle_a, b"first");
        assert_eq!(try_recv(&mut c).await.as_deref(), Some(&b"first"[..]));
        wait_until_closed(&b.conn).await;

        let report = registry.broadcast_except(&handle_a, b"still here");
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);

        assert_eq!(try_recv(&mut c).await.as_deref(), Some(&b"still here"[..]));
        // B stays registered until its own session task notices
        assert!(registry.contains(&handle_b));
    }

    #[tokio::test]
    async fn test_recipient_that_never_reads_does_not_block_broadcast() {
        let registry = SessionRegistry::new();
        let a = test_peer();
        let mut b = test_peer();

        // C's pipe holds less than one frame and nobody ever reads it
        let (server_side, _stalled_client) = duplex(16);
        let (read_half, write_half) = split(server_side);
        let (_c_reader, c_conn) = Connection::from_parts_with_queue(
            Box::new(read_half),
            Box::new(write_half),
            "127.0.0.1:50001".parse().unwrap(),
            MAX,
            2,
        );

        let handle_a = registry.register(a.id, Arc::clone(&a.conn));
        registry.register(b.id, Arc::clone(&b.conn));
        registry.register(SessionId::next(), Arc::clone(&c_conn));

        let mut dropped = 0;
        for i in 0..20u8 {
            let report = registry.broadcast_except(&handle_a, &[i; 32]);
            assert_eq!(report.delivered + report.failed, 2);
            dropped += report.failed;

            // B keeps up and sees every frame in order
            assert_eq!(try_recv(&mut b).await, Some(vec![i; 32]));
        }

        // C took at most one in-flight frame plus a full queue
        assert!(dropped >= 20 - 3);
        assert_eq!(c_conn.state(), crate::network::ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_other_sessions() {
        let registry = SessionRegistry::new();
        let a = test_peer();
        let handle_a = registry.register(a.id, Arc::clone(&a.conn));

        let report = registry.broadcast_except(&handle_a, b"anyone?");
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_concurrent_membership_changes_during_broadcast() {
        let registry = Arc::new(SessionRegistry::new());
        let sender = test_peer();
        let sender_handle = registry.register(sender.id, Arc::clone(&sender.conn));

        let mut peers: Vec<TestPeer> = (0..16).map(|_| test_peer()).collect();
        let handles: Vec<RegistryHandle> = peers
            .iter()
            .map(|p| registry.register(p.id, Arc::clone(&p.conn)))
            .collect();

        let churn = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for handle in handles.iter().step_by(2) {
                    registry.unregister(handle);
                    tokio::task::yield_now().await;
                }
            })
        };

        let report = registry.broadcast_except(&sender_handle, b"tick");
        churn.await.unwrap();

        // Each peer got the frame at most once and nothing failed
        assert_eq!(report.failed, 0);
        let mut received = 0;
        for peer in peers.iter_mut() {
            if try_recv(peer).await.is_some() {
                received += 1;
                assert!(try_recv(peer).await.is_none());
            }
        }
        assert_eq!(received, report.delivered);
        assert_eq!(registry.len(), 1 + 8);
    }
}

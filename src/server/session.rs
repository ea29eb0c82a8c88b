//! Per-connection session handling
//!
//! Each accepted connection runs through a small state machine:
//!
//! ```text
//! Connected --handshake--> Identified --chat--> Identified
//!     |                        |
//!     +------ end/error -------+----> Closed
//! ```
//!
//! While `Connected` the only acceptable frame is a handshake; anything else
//! closes the session without relaying it. Once `Identified`, every frame is
//! relayed as `"<name> : <message>"` to all other sessions, including frames
//! that happen to start with the handshake marker.
//!
//! Teardown runs exactly once per session. The normal path consumes the
//! `Session` in [`SessionHandler::run`]; if the task panics or is aborted
//! instead, the `Registration` drop guard still removes it from the registry.

use crate::error::{ChatError, ProtocolError, Result};
use crate::network::{Connection, FrameReader};
use crate::protocol::{max_message_len, parse_handshake, Announcement};
use crate::server::events::{EventHandlers, ServerEvent};
use crate::server::registry::{RegistryHandle, SessionId, SessionRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, waiting for the handshake
    Connected,
    /// Display name bound; relaying chat
    Identified,
    /// Torn down
    Closed,
}

/// Why a session ended
#[derive(Debug)]
pub enum CloseReason {
    /// The client closed the stream
    PeerClosed,
    /// A read failed, a frame could not be decoded, or the handshake was rejected
    Error(ChatError),
    /// The server is shutting down
    Shutdown,
}

/// Server-side bookkeeping for one connected client
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    handle: RegistryHandle,
    display_name: Option<String>,
    state: SessionState,
    connection: Arc<Connection>,
}

impl Session {
    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Display name, once the handshake has been processed
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session's connection
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    fn identify(&mut self, name: String) {
        debug_assert!(self.display_name.is_none(), "display name bound twice");
        self.display_name = Some(name);
        self.state = SessionState::Identified;
    }
}

/// Removes a session from the registry when dropped
struct Registration {
    registry: Arc<SessionRegistry>,
    handle: RegistryHandle,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.unregister(&self.handle) {
            debug!(session_id = %self.handle.id(), "Session unregistered");
        }
    }
}

/// Runs sessions against a shared registry
#[derive(Debug, Clone)]
pub struct SessionHandler {
    registry: Arc<SessionRegistry>,
    events: EventHandlers,
    max_name_len: usize,
}

impl SessionHandler {
    /// Create a handler
    pub fn new(
        registry: Arc<SessionRegistry>,
        events: EventHandlers,
        max_name_len: usize,
    ) -> Self {
        Self {
            registry,
            events,
            max_name_len,
        }
    }

    /// The registry sessions are added to
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a connection and drive it until it closes
    ///
    /// Never returns an error: every per-connection failure ends in teardown
    /// and is reported through the returned `CloseReason`.
    pub async fn run(&self, mut reader: FrameReader, shutdown: CancellationToken) -> CloseReason {
        let connection = Arc::clone(reader.connection());
        let id = SessionId::next();
        let handle = self.registry.register(id, Arc::clone(&connection));
        let registration = Registration {
            registry: Arc::clone(&self.registry),
            handle,
        };

        let mut session = Session {
            id,
            handle,
            display_name: None,
            state: SessionState::Connected,
            connection,
        };

        info!(
            session_id = %id,
            peer = %session.connection.peer_addr(),
            "New client connected"
        );
        self.events.dispatch(ServerEvent::SessionOpened {
            id,
            peer: session.connection.peer_addr(),
        });

        let reason = loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => None,
                frame = reader.next_frame() => Some(frame),
            };
            let Some(frame) = frame else {
                break CloseReason::Shutdown;
            };

            match frame {
                Ok(Some(payload)) => {
                    if let Err(e) = self.handle_frame(&mut session, &payload) {
                        break CloseReason::Error(e);
                    }
                },
                Ok(None) => break CloseReason::PeerClosed,
                Err(ChatError::PeerClosed) => break CloseReason::PeerClosed,
                Err(e) => break CloseReason::Error(e),
            }
        };

        self.teardown(session, registration, &reason).await;
        reason
    }

    /// Apply one inbound frame to the session state machine
    ///
    /// The first frame must be a handshake. Every later frame is chat.
    fn handle_frame(&self, session: &mut Session, payload: &[u8]) -> Result<()> {
        match session.display_name.as_deref() {
            None => {
                let name = parse_handshake(payload, self.max_name_len)?;
                session.identify(name.clone());

                info!(session_id = %session.id, "{} connected.", name);
                let announcement = Announcement::Joined { name: &name }.to_payload();
                self.registry.broadcast_except(&session.handle, &announcement);

                self.events.dispatch(ServerEvent::Joined {
                    id: session.id,
                    name,
                });
                Ok(())
            },
            Some(name) => {
                let max = max_message_len(session.connection.max_frame_size(), name);
                if payload.len() > max {
                    return Err(ProtocolError::MessageTooLong {
                        size: payload.len(),
                        max,
                    }
                    .into());
                }

                info!(
                    session_id = %session.id,
                    "Message from {}: {}",
                    name,
                    String::from_utf8_lossy(payload)
                );

                let line = Announcement::Chat {
                    name,
                    message: payload,
                }
                .to_payload();
                let report = self.registry.broadcast_except(&session.handle, &line);
                if report.failed > 0 {
                    debug!(
                        session_id = %session.id,
                        failed = report.failed,
                        "Some recipients missed a message"
                    );
                }

                self.events.dispatch(ServerEvent::MessageRelayed {
                    id: session.id,
                    recipients: report.delivered,
                });
                Ok(())
            },
        }
    }

    /// Unregister, announce departure, close the connection
    async fn teardown(
        &self,
        mut session: Session,
        registration: Registration,
        reason: &CloseReason,
    ) {
        session.state = SessionState::Closed;
        drop(registration);

        match reason {
            CloseReason::PeerClosed => {
                debug!(session_id = %session.id, "Peer closed connection");
            },
            CloseReason::Shutdown => {
                debug!(session_id = %session.id, "Closing for server shutdown");
            },
            CloseReason::Error(e) if e.is_decode_error() => {
                warn!(
                    session_id = %session.id,
                    peer = %session.connection.peer_addr(),
                    error = %e,
                    "Rejected client"
                );
            },
            CloseReason::Error(e) => {
                warn!(
                    session_id = %session.id,
                    peer = %session.connection.peer_addr(),
                    error = %e,
                    "Connection failed"
                );
            },
        }

        if let Some(name) = session.display_name.as_deref() {
            info!(session_id = %session.id, "{} disconnected.", name);
            let announcement = Announcement::Left { name }.to_payload();
            self.registry.broadcast_except(&session.handle, &announcement);
        }

        session.connection.close().await;

        debug!(
            session_id = %session.id,
            bytes_sent = session.connection.bytes_sent(),
            bytes_received = session.connection.bytes_received(),
            age_ms = session.connection.age().as_millis() as u64,
            "Session closed"
        );

        self.events.dispatch(ServerEvent::SessionClosed {
            id: session.id,
            name: session.display_name.take(),
        });
    }
}

//! Chat server
//!
//! [`ChatServer`] binds a listener, accepts connections and runs one
//! supervised session task per client. Sessions share a
//! [`SessionRegistry`] through which every message is relayed to the other
//! clients.
//!
//! # Example
//!
//! ```no_run
//! use relaychat::{ChatServer, ServerConfig};
//!
//! # async fn example() -> relaychat::Result<()> {
//! let server = ChatServer::bind(ServerConfig::default()).await?;
//! println!("listening on {}", server.local_addr()?);
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod registry;
pub mod session;

pub use events::{EventHandlers, ServerEvent, SubscriptionHandle};
pub use registry::{BroadcastReport, RegistryHandle, SessionId, SessionRegistry};
pub use session::{CloseReason, Session, SessionHandler, SessionState};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::network::Listener;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound chat server, ready to run
pub struct ChatServer {
    listener: Listener,
    handler: SessionHandler,
    events: EventHandlers,
    shutdown: CancellationToken,
}

impl ChatServer {
    /// Validate the configuration and bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for invalid settings and
    /// `TransportError::BindFailed` if the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = Listener::bind(config.listen_addr, config.max_frame_size)
            .await?
            .with_outbound_queue_len(config.outbound_queue_len);
        let events = EventHandlers::new();
        let handler = SessionHandler::new(
            Arc::new(SessionRegistry::new()),
            events.clone(),
            config.max_name_len,
        );

        Ok(Self {
            listener,
            handler,
            events,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registry of live sessions
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.handler.registry()
    }

    /// Subscribe to server lifecycle events
    pub fn on_event<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Remove an event subscription
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.events.unsubscribe(handle);
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept and serve clients until the shutdown token is cancelled
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!("Server is listening on {}", addr);
        self.events.dispatch(ServerEvent::Started { addr });

        accept_loop(self.listener, self.handler, self.shutdown).await;

        info!("Server stopped");
        self.events.dispatch(ServerEvent::Stopped);
        Ok(())
    }
}

impl std::fmt::Debug for ChatServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("sessions", &self.registry().len())
            .finish()
    }
}

/// Accept connections and run a session task for each
///
/// Accept failures are logged and the loop keeps going. Session tasks are
/// kept in a `JoinSet`; finished ones are reaped as the loop runs and a
/// panicking task is logged without disturbing the others. Once `shutdown`
/// is cancelled the loop stops accepting and waits for every session to
/// finish its teardown.
pub async fn accept_loop(
    listener: Listener,
    handler: SessionHandler,
    shutdown: CancellationToken,
) {
    let mut sessions: JoinSet<CloseReason> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                reap(finished);
            },
            accepted = listener.accept() => match accepted {
                Ok((reader, connection)) => {
                    debug!(peer = %connection.peer_addr(), "Accepted connection");
                    let handler = handler.clone();
                    let shutdown = shutdown.clone();
                    sessions.spawn(async move { handler.run(reader, shutdown).await });
                },
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                },
            },
        }
    }

    debug!(remaining = sessions.len(), "Draining sessions");
    while let Some(finished) = sessions.join_next().await {
        reap(finished);
    }
}

fn reap(finished: std::result::Result<CloseReason, tokio::task::JoinError>) {
    match finished {
        Ok(reason) => debug!(?reason, "Session task finished"),
        Err(e) if e.is_panic() => error!(error = %e, "Session task panicked"),
        Err(e) => debug!(error = %e, "Session task cancelled"),
    }
}

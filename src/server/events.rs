//! Server lifecycle events
//!
//! Embedders and tests can subscribe to a stream of `ServerEvent`s to follow
//! sessions as they open, identify, chat and close without scraping logs.

use crate::server::registry::SessionId;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events emitted by a running chat server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The accept loop is running
    Started {
        /// Address the listener is bound to
        addr: SocketAddr,
    },

    /// A connection was accepted and registered
    SessionOpened {
        /// Session identifier
        id: SessionId,
        /// Remote address
        peer: SocketAddr,
    },

    /// A session completed its handshake
    Joined {
        /// Session identifier
        id: SessionId,
        /// Display name bound to the session
        name: String,
    },

    /// A chat frame was relayed
    MessageRelayed {
        /// Sending session
        id: SessionId,
        /// Number of recipients that received the frame
        recipients: usize,
    },

    /// A session was torn down
    SessionClosed {
        /// Session identifier
        id: SessionId,
        /// Display name, if the session ever identified itself
        name: Option<String>,
    },

    /// The accept loop has exited and all sessions are drained
    Stopped,
}

/// Handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Type alias for event handler callbacks
pub type EventCallback = Arc<dyn Fn(ServerEvent) + Send + Sync + 'static>;

/// Manages event subscriptions and delivery
#[derive(Clone, Default)]
pub struct EventHandlers {
    handlers: Arc<RwLock<Vec<(SubscriptionHandle, EventCallback)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventHandlers {
    /// Create an empty handler set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler
    ///
    /// Handlers run synchronously on the task that produced the event, so
    /// they should return quickly.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((handle, Arc::new(callback)));
        handle
    }

    /// Remove a handler. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.handlers.write().retain(|(h, _)| *h != handle);
    }

    /// Deliver an event to every handler
    ///
    /// A panicking handler is logged and skipped; the rest still run.
    pub fn dispatch(&self, event: ServerEvent) {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
        let handlers: Vec<_> = self.handlers.read().clone();

        for (handle, callback) in handlers {
            let event_clone = event.clone();
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event_clone);
            })) {
                tracing::error!(
                    "Event handler {:?} panicked: {:?}",
                    handle,
                    e.downcast_ref::<&str>()
                        .copied()
                        .or_else(|| e.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic")
                );
            }
        }
    }

    /// Get the number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

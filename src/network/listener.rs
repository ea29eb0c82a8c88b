//! TCP listener for incoming chat connections

use crate::config::DEFAULT_OUTBOUND_QUEUE_LEN;
use crate::error::{Result, TransportError};
use crate::network::connection::{Connection, FrameReader};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Listening socket that yields framed connections
pub struct Listener {
    listener: TcpListener,
    max_frame_size: usize,
    queue_len: usize,
}

impl Listener {
    /// Bind a listener to an address
    ///
    /// # Example
    ///
    /// ```no_run
    /// use relaychat::network::Listener;
    /// use std::net::SocketAddr;
    ///
    /// # async fn example() -> relaychat::error::Result<()> {
    /// let addr: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    /// let listener = Listener::bind(addr, 64 * 1024).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bind(address: SocketAddr, max_frame_size: usize) -> Result<Self> {
        let listener =
            TcpListener::bind(address)
                .await
                .map_err(|e| TransportError::BindFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self {
            listener,
            max_frame_size,
            queue_len: DEFAULT_OUTBOUND_QUEUE_LEN,
        })
    }

    /// Set the outbound queue length of accepted connections
    pub fn with_outbound_queue_len(mut self, len: usize) -> Self {
        self.queue_len = len;
        self
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| {
            TransportError::BindFailed {
                address: "listener".to_string(),
                reason: format!("Failed to get local address: {}", e),
            }
            .into()
        })
    }

    /// Accept the next incoming connection
    pub async fn accept(&self) -> Result<(FrameReader, Arc<Connection>)> {
        let (stream, peer_addr) =
            self.listener
                .accept()
                .await
                .map_err(|e| TransportError::AcceptFailed {
                    reason: e.to_string(),
                })?;

        Ok(Connection::from_tcp(
            stream,
            peer_addr,
            self.max_frame_size,
            self.queue_len,
        ))
    }
}

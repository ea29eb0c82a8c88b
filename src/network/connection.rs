//! Framed connections
//!
//! A connection is split into two halves. The read half is a `FrameReader`
//! owned by exactly one task. The write half is a shared `Connection` that
//! feeds a bounded outbound queue. A dedicated writer task drains the queue
//! onto the socket, so frames never interleave on the wire and a peer that
//! stops reading only ever fills its own queue.

use crate::config::DEFAULT_OUTBOUND_QUEUE_LEN;
use crate::error::{ChatError, ProtocolError, Result, TransportError};
use crate::network::framing::{read_frame, write_frame, LENGTH_PREFIX_LEN};
use parking_lot::Mutex as StateMutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

/// How long `close` waits for queued frames to drain before dropping them
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Read half of a connection, type-erased so tests can use in-memory pipes
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is open and can send/receive
    Connected,
    /// Connection is in the process of closing
    Closing,
    /// Connection is closed
    Closed,
}

/// Work item for the writer task
enum Outbound {
    /// Write one frame
    Frame(Arc<[u8]>),
    /// Shut down the write side, then acknowledge
    Shutdown(oneshot::Sender<()>),
}

/// Shared write side of a connection plus its bookkeeping
pub struct Connection {
    /// Queue drained by the writer task
    outbound: mpsc::Sender<Outbound>,
    /// Capacity of `outbound`, in frames
    queue_len: usize,
    /// Lets `close` stop a writer stuck on a peer that never reads
    writer_task: AbortHandle,
    /// Current connection state, shared with the writer task
    state: Arc<StateMutex<ConnectionState>>,
    /// Remote peer address
    peer_addr: SocketAddr,
    /// Largest payload this connection will send or accept
    max_frame_size: usize,
    /// When this connection was created
    created_at: Instant,
    /// Total bytes written to the socket, prefixes included
    bytes_sent: Arc<AtomicU64>,
    /// Total bytes received over this connection, prefixes included
    bytes_received: AtomicU64,
}

impl Connection {
    /// Connect to a chat server
    pub async fn connect(
        address: SocketAddr,
        max_frame_size: usize,
    ) -> Result<(FrameReader, Arc<Self>)> {
        let stream =
            TcpStream::connect(address)
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self::from_tcp(
            stream,
            address,
            max_frame_size,
            DEFAULT_OUTBOUND_QUEUE_LEN,
        ))
    }

    /// Wrap an accepted or connected TCP stream
    pub fn from_tcp(
        stream: TcpStream,
        peer_addr: SocketAddr,
        max_frame_size: usize,
        queue_len: usize,
    ) -> (FrameReader, Arc<Self>) {
        // Chat frames are small; don't let Nagle hold them back
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        Self::from_parts_with_queue(
            Box::new(read_half),
            Box::new(write_half),
            peer_addr,
            max_frame_size,
            queue_len,
        )
    }

    /// Build a connection from arbitrary read and write halves
    ///
    /// Spawns the writer task, so this must be called within a tokio runtime.
    pub fn from_parts(
        reader: BoxedReader,
        writer: BoxedWriter,
        peer_addr: SocketAddr,
        max_frame_size: usize,
    ) -> (FrameReader, Arc<Self>) {
        Self::from_parts_with_queue(
            reader,
            writer,
            peer_addr,
            max_frame_size,
            DEFAULT_OUTBOUND_QUEUE_LEN,
        )
    }

    /// Build a connection whose outbound queue holds `queue_len` frames
    pub fn from_parts_with_queue(
        reader: BoxedReader,
        writer: BoxedWriter,
        peer_addr: SocketAddr,
        max_frame_size: usize,
        queue_len: usize,
    ) -> (FrameReader, Arc<Self>) {
        let queue_len = queue_len.max(1);
        let (outbound, queue) = mpsc::channel(queue_len);
        let state = Arc::new(StateMutex::new(ConnectionState::Connected));
        let bytes_sent = Arc::new(AtomicU64::new(0));

        let writer_task = tokio::spawn(write_loop(
            writer,
            queue,
            Arc::clone(&state),
            Arc::clone(&bytes_sent),
            peer_addr,
            max_frame_size,
        ))
        .abort_handle();

        let connection = Arc::new(Self {
            outbound,
            queue_len,
            writer_task,
            state,
            peer_addr,
            max_frame_size,
            created_at: Instant::now(),
            bytes_sent,
            bytes_received: AtomicU64::new(0),
        });

        let reader = FrameReader {
            reader,
            connection: Arc::clone(&connection),
        };

        (reader, connection)
    }

    /// Queue one frame for the peer, waiting for room if the queue is full
    ///
    /// Frames are written in the order they were queued. A successful return
    /// means the frame was accepted by the writer task, not that it reached
    /// the peer.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::SendFailed` if the connection is closed or the
    /// writer has stopped, and `ProtocolError::FrameTooLarge` for oversized
    /// payloads.
    pub async fn send_frame(&self, payload: &[u8]) -> Result<()> {
        self.check_sendable(payload.len())?;

        self.outbound
            .send(Outbound::Frame(Arc::from(payload)))
            .await
            .map_err(|_| self.closed_error())
    }

    /// Queue one frame without waiting
    ///
    /// Used for fan-out, where one slow recipient must not hold up the
    /// sender. The frame is shared, so broadcasting it costs no copies.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::QueueFull` if the peer is not keeping up, in
    /// which case the frame is dropped for this peer only. Otherwise fails
    /// like [`send_frame`](Self::send_frame).
    pub fn try_send_frame(&self, payload: &Arc<[u8]>) -> Result<()> {
        self.check_sendable(payload.len())?;

        match self.outbound.try_send(Outbound::Frame(Arc::clone(payload))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::QueueFull {
                peer: self.peer_addr.to_string(),
                capacity: self.queue_len,
            }
            .into()),
            Err(TrySendError::Closed(_)) => Err(self.closed_error()),
        }
    }

    fn check_sendable(&self, len: usize) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(self.closed_error());
        }
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            }
            .into());
        }
        Ok(())
    }

    fn closed_error(&self) -> ChatError {
        TransportError::SendFailed {
            reason: format!("connection to {} is closed", self.peer_addr),
        }
        .into()
    }

    /// Flush queued frames, shut down the write side and mark the connection
    /// closed
    ///
    /// Frames queued before the call are still written. If they cannot drain
    /// within a short timeout the writer is aborted and they are dropped.
    /// Safe to call more than once; only the first call touches the stream.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Closing;
        }

        let (ack, acked) = oneshot::channel();
        let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
            if self.outbound.send(Outbound::Shutdown(ack)).await.is_ok() {
                let _ = acked.await;
            }
        })
        .await;

        if drained.is_err() {
            debug!(peer = %self.peer_addr, "Outbound queue did not drain, aborting writer");
            self.writer_task.abort();
        }

        *self.state.lock() = ConnectionState::Closed;
    }

    /// Get the connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the frame size limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Capacity of the outbound queue, in frames
    pub fn queue_len(&self) -> usize {
        self.queue_len
    }

    /// Get total bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get total bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get connection age
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("queue_len", &self.queue_len)
            .field("bytes_sent", &self.bytes_sent())
            .field("bytes_received", &self.bytes_received())
            .finish()
    }
}

/// Drain the outbound queue onto the socket
///
/// Ends when the connection is dropped, on shutdown, or on the first write
/// error. The connection is marked closed on the way out, so later sends fail
/// fast instead of queueing into a dead socket.
async fn write_loop(
    mut writer: BoxedWriter,
    mut queue: mpsc::Receiver<Outbound>,
    state: Arc<StateMutex<ConnectionState>>,
    bytes_sent: Arc<AtomicU64>,
    peer_addr: SocketAddr,
    max_frame_size: usize,
) {
    while let Some(item) = queue.recv().await {
        match item {
            Outbound::Frame(payload) => {
                if let Err(e) = write_frame(&mut writer, &payload, max_frame_size).await {
                    debug!(peer = %peer_addr, error = %e, "Write failed, stopping writer");
                    break;
                }
                let written = (payload.len() + LENGTH_PREFIX_LEN) as u64;
                bytes_sent.fetch_add(written, Ordering::Relaxed);
            },
            Outbound::Shutdown(ack) => {
                if let Err(e) = writer.shutdown().await {
                    debug!(peer = %peer_addr, error = %e, "Shutdown on close failed");
                }
                let _ = ack.send(());
                break;
            },
        }
    }

    *state.lock() = ConnectionState::Closed;
}

/// Read half of a connection
pub struct FrameReader {
    reader: BoxedReader,
    connection: Arc<Connection>,
}

impl FrameReader {
    /// Read the next frame
    ///
    /// Returns `Ok(None)` on orderly end of stream. Closing the write side
    /// does not stop reading; the peer may still have frames in flight.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let frame = read_frame(&mut self.reader, self.connection.max_frame_size).await?;

        if let Some(payload) = &frame {
            self.connection
                .bytes_received
                .fetch_add((payload.len() + LENGTH_PREFIX_LEN) as u64, Ordering::Relaxed);
        }

        Ok(frame)
    }

    /// The shared write side paired with this reader
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

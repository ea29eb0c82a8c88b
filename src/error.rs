//! Error types for relaychat
//!
//! Errors are grouped by the layer that produces them. Transport errors come
//! from socket operations, protocol errors from frames or handshakes that
//! violate the wire format, and configuration errors from invalid settings.
//! `ChatError` ties them together.

use thiserror::Error;

/// Main error type for relaychat operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// Socket-level failures (bind, accept, connect, send, receive)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed frames or handshakes
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The peer closed the stream
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Console or other local I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether this error is an ordinary disconnect rather than a fault
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Self::PeerClosed)
    }

    /// Whether this error came from an undecodable frame or handshake
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

/// Socket-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Listening socket could not be bound
    #[error("Failed to bind {address}: {reason}")]
    BindFailed {
        /// Address we tried to bind
        address: String,
        /// Underlying cause
        reason: String,
    },

    /// Accepting an incoming connection failed
    #[error("Failed to accept connection: {reason}")]
    AcceptFailed {
        /// Underlying cause
        reason: String,
    },

    /// Outgoing connection could not be established
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// Address we tried to reach
        address: String,
        /// Underlying cause
        reason: String,
    },

    /// Writing a frame failed
    #[error("Send failed: {reason}")]
    SendFailed {
        /// Underlying cause
        reason: String,
    },

    /// Reading a frame failed
    #[error("Receive failed: {reason}")]
    ReceiveFailed {
        /// Underlying cause
        reason: String,
    },

    /// The peer is not keeping up and its outbound queue is full
    #[error("Outbound queue to {peer} is full ({capacity} frames)")]
    QueueFull {
        /// Slow peer
        peer: String,
        /// Queue capacity in frames
        capacity: usize,
    },
}

/// Wire format violations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Declared or requested frame length exceeds the limit
    #[error("Frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Offending length
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Stream ended in the middle of a frame
    #[error("Truncated frame: expected {expected} bytes, received {received}")]
    TruncatedFrame {
        /// Bytes the frame needed
        expected: usize,
        /// Bytes that arrived before the stream ended
        received: usize,
    },

    /// Chat text too long to relay once the sender's name is prepended
    #[error("Message of {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLong {
        /// Message length in bytes
        size: usize,
        /// Longest message this sender may relay
        max: usize,
    },

    /// First frame on a connection was not a handshake
    #[error("Expected handshake frame")]
    MissingHandshake,

    /// Handshake carried no name
    #[error("Display name is empty")]
    EmptyDisplayName,

    /// Handshake name exceeds the limit
    #[error("Display name of {len} bytes exceeds maximum of {max} bytes")]
    DisplayNameTooLong {
        /// Name length in bytes
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Handshake name is not usable text
    #[error("Invalid display name: {reason}")]
    InvalidDisplayName {
        /// Why the name was rejected
        reason: String,
    },
}

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ChatError>;

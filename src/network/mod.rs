//! Network module
//!
//! TCP transport for the chat service: length-prefixed framing, framed
//! connections with serialized writes, and the listening socket.

pub mod connection;
pub mod framing;
mod listener;

pub use connection::{BoxedReader, BoxedWriter, Connection, ConnectionState, FrameReader};
pub use framing::{read_frame, write_frame, LENGTH_PREFIX_LEN};
pub use listener::Listener;

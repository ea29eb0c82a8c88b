//! # Relaychat
//!
//! A multi-client TCP chat relay. The server tracks every connected client in
//! a registry, learns each client's display name from a handshake frame, and
//! relays every later message to all other clients.
//!
//! All traffic uses length-prefixed frames: a 4-byte big-endian length
//! followed by that many payload bytes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use relaychat::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().with_listen_addr("127.0.0.1:12345".parse()?);
//!     let server = ChatServer::bind(config).await?;
//!
//!     let shutdown = server.shutdown_token();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod server;

// Re-export main types
pub use client::{ChatClient, Console, SessionEnd};
pub use config::{ClientConfig, ServerConfig};
pub use error::{ChatError, ConfigError, ProtocolError, Result, TransportError};
pub use server::{
    BroadcastReport, ChatServer, CloseReason, ServerEvent, SessionId, SessionRegistry,
    SubscriptionHandle,
};

//! Configuration types for the chat server and client
//!
//! Both sides are configured in code (or from command-line flags by the
//! binaries). There is no configuration file and no environment lookup.

use crate::error::ConfigError;
use crate::protocol::NAME_FRAME_OVERHEAD;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default TCP port for the chat service
pub const DEFAULT_PORT: u16 = 12345;

/// Default maximum payload size of a single frame (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default maximum display name length in bytes
pub const DEFAULT_MAX_NAME_LEN: usize = 64;

/// Default number of frames queued for one peer before broadcasts to it are
/// dropped
pub const DEFAULT_OUTBOUND_QUEUE_LEN: usize = 256;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to
    ///
    /// Port 0 selects a random available port.
    pub listen_addr: SocketAddr,

    /// Largest frame payload accepted from or sent to a client
    pub max_frame_size: usize,

    /// Largest display name accepted in a handshake, in bytes
    pub max_name_len: usize,

    /// Frames buffered per client before broadcasts to it are dropped
    pub outbound_queue_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            outbound_queue_len: DEFAULT_OUTBOUND_QUEUE_LEN,
        }
    }
}

impl ServerConfig {
    /// Set the listen address
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the maximum frame payload size
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum display name length
    pub fn with_max_name_len(mut self, len: usize) -> Self {
        self.max_name_len = len;
        self
    }

    /// Set the per-client outbound queue length
    pub fn with_outbound_queue_len(mut self, len: usize) -> Self {
        self.outbound_queue_len = len;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `max_frame_size` is 0 or does not fit the 4-byte length prefix
    /// - `max_name_len` or `outbound_queue_len` is 0
    /// - a handshake or presence line carrying a maximum-length name would
    ///   not fit in one frame
    pub fn validate(&self) -> crate::Result<()> {
        validate_frame_size(self.max_frame_size)?;

        if self.max_name_len == 0 {
            return Err(invalid("max_name_len", "must be greater than 0").into());
        }

        if self.outbound_queue_len == 0 {
            return Err(invalid("outbound_queue_len", "must be greater than 0").into());
        }

        if self.max_name_len + NAME_FRAME_OVERHEAD > self.max_frame_size {
            return Err(invalid(
                "max_name_len",
                format!(
                    "frames naming a client take up to {} bytes, over max_frame_size {}",
                    self.max_name_len + NAME_FRAME_OVERHEAD,
                    self.max_frame_size
                ),
            )
            .into());
        }

        Ok(())
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Address of the chat server
    pub server_addr: SocketAddr,

    /// Largest frame payload accepted from or sent to the server
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Set the server address
    pub fn with_server_addr(mut self, addr: SocketAddr) -> Self {
        self.server_addr = addr;
        self
    }

    /// Set the maximum frame payload size
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        validate_frame_size(self.max_frame_size)
    }
}

fn validate_frame_size(size: usize) -> crate::Result<()> {
    if size == 0 {
        return Err(invalid("max_frame_size", "must be greater than 0").into());
    }
    if u32::try_from(size).is_err() {
        return Err(invalid("max_frame_size", "must fit in a 4-byte length prefix").into());
    }
    Ok(())
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

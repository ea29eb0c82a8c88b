//! Relaychat server
//!
//! Listens for chat clients and relays every message to all other
//! connected clients until interrupted with Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use relaychat::config::{
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_NAME_LEN, DEFAULT_OUTBOUND_QUEUE_LEN, DEFAULT_PORT,
};
use relaychat::{ChatServer, ServerConfig};
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{info, warn};

/// Relaychat server - relays chat messages between connected clients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value_t = SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))]
    listen: SocketAddr,

    /// Largest frame payload in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Longest display name in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_NAME_LEN)]
    max_name_len: usize,

    /// Frames buffered per client before messages to it are dropped
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE_LEN)]
    outbound_queue_len: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("relaychat={},relaychat_server={}", log_level, log_level))
        .with_target(false)
        .init();

    let config = ServerConfig::default()
        .with_listen_addr(args.listen)
        .with_max_frame_size(args.max_frame_size)
        .with_max_name_len(args.max_name_len)
        .with_outbound_queue_len(args.outbound_queue_len);

    let server = ChatServer::bind(config)
        .await
        .with_context(|| format!("Failed to start server on {}", args.listen))?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    server.run().await.context("Server failed")?;

    Ok(())
}

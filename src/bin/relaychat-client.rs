//! Relaychat client
//!
//! Connects to a relaychat server, asks for a display name and then sends
//! each line typed on stdin. Messages from other users are printed as they
//! arrive. Type `quit` or `exit` to leave.

use anyhow::{Context, Result};
use clap::Parser;
use relaychat::config::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use relaychat::{ChatClient, ClientConfig, Console};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::BufReader;

/// Relaychat client - terminal chat over TCP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value_t = SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)))]
    server: SocketAddr,

    /// Largest frame payload in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep stdout for the chat itself
    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter("relaychat=debug,relaychat_client=debug")
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let console = Console::stdout();
    console.write_line("Client started")?;

    let config = ClientConfig::default()
        .with_server_addr(args.server)
        .with_max_frame_size(args.max_frame_size);

    let client = ChatClient::connect(config)
        .await
        .with_context(|| format!("Unable to connect to server at {}", args.server))?;
    console.write_line("Successfully connected to server")?;

    let outcome = client
        .run(BufReader::new(tokio::io::stdin()), console)
        .await
        .context("Chat session failed")?;
    tracing::debug!(?outcome, "Session ended");

    // A pending stdin read would keep the runtime from shutting down
    std::process::exit(0);
}

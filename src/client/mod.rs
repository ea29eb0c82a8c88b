//! Chat client
//!
//! A client session runs two paths over one connection. The sender path
//! reads the user's display name, performs the handshake and then sends
//! each line the user types. The receiver path prints every frame the
//! server relays. Both share a [`Console`] so their output stays readable.
//!
//! The session ends when the user types `quit` or `exit` (or input ends),
//! or when the server goes away.

pub mod console;

pub use console::Console;

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::network::{Connection, FrameReader};
use crate::protocol::{handshake_payload, max_message_len};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Inputs that end the session locally; never sent to the server
pub const QUIT_COMMANDS: &[&str] = &["quit", "exit"];

/// Prompt shown until a non-empty display name is entered
pub const NAME_PROMPT: &str = "Enter your chat name: ";

/// Prompt shown before each message
pub const MESSAGE_PROMPT: &str = "Send your message: ";

const STOPPING_NOTICE: &str = "\nStopping the application.";
const DISCONNECTED_NOTICE: &str = "\nDisconnected from server.";
const SEND_FAILED_NOTICE: &str = "\nError sending message.";
const TOO_LONG_NOTICE: &str = "\nMessage too long, not sent.";

/// How long to wait for the server to close its side after we quit
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a client session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user quit or input ran out
    Quit,
    /// The server closed the connection
    Disconnected,
}

/// Whether a line of input is a quit command
pub fn is_quit_command(line: &str) -> bool {
    QUIT_COMMANDS.contains(&line.trim())
}

/// A connected chat client
pub struct ChatClient {
    reader: FrameReader,
}

impl ChatClient {
    /// Validate the configuration and connect to the server
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for invalid settings and
    /// `TransportError::ConnectFailed` if the server cannot be reached.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let (reader, connection) =
            Connection::connect(config.server_addr, config.max_frame_size).await?;
        info!(server = %connection.peer_addr(), "Connected to server");

        Ok(Self { reader })
    }

    /// Wrap an already established connection
    pub fn from_reader(reader: FrameReader) -> Self {
        Self { reader }
    }

    /// The connection to the server
    pub fn connection(&self) -> &Arc<Connection> {
        self.reader.connection()
    }

    /// Run the interactive session until the user quits or the server leaves
    pub async fn run<I, W>(self, input: I, console: Console<W>) -> Result<SessionEnd>
    where
        I: AsyncBufRead + Unpin + Send + 'static,
        W: Write + Send + 'static,
    {
        run_session(self.reader, input, console).await
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("connection", self.connection())
            .finish()
    }
}

/// Drive a client session over a connected socket
///
/// The sender path runs as its own task reading from `input`; the receiver
/// path runs on the calling task. Whichever finishes first decides the
/// outcome:
///
/// - receiver first (server closed or sent garbage): the sender task is
///   aborted, the connection closed, and [`SessionEnd::Disconnected`]
///   returned
/// - sender first (quit or end of input): the write side is already shut
///   down; the receiver keeps printing until the server closes its side,
///   bounded by a short grace period, and [`SessionEnd::Quit`] is returned
///
/// # Errors
///
/// Console write failures and send failures on the sender path.
pub async fn run_session<I, W>(
    mut reader: FrameReader,
    input: I,
    console: Console<W>,
) -> Result<SessionEnd>
where
    I: AsyncBufRead + Unpin + Send + 'static,
    W: Write + Send + 'static,
{
    let connection = Arc::clone(reader.connection());
    let mut sender = tokio::spawn(send_loop(Arc::clone(&connection), input, console.clone()));

    let receiving = receive_loop(&mut reader, &console);
    tokio::pin!(receiving);

    tokio::select! {
        received = &mut receiving => {
            sender.abort();
            connection.close().await;
            received?;
            Ok(SessionEnd::Disconnected)
        },
        sent = &mut sender => {
            let sent = sent.map_err(|e| {
                ChatError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
            })?;

            match tokio::time::timeout(DRAIN_TIMEOUT, receiving).await {
                Ok(received) => received?,
                Err(_) => debug!("Server did not close in time"),
            }
            connection.close().await;

            sent.map(|()| SessionEnd::Quit)
        },
    }
}

/// Sender path: name prompt, handshake, then one frame per input line
async fn send_loop<I, W>(
    connection: Arc<Connection>,
    input: I,
    console: Console<W>,
) -> Result<()>
where
    I: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();

    let name = loop {
        console.prompt(NAME_PROMPT)?;
        match lines.next_line().await? {
            Some(line) if !line.trim().is_empty() => break line.trim().to_string(),
            Some(_) => continue,
            None => {
                console.write_line(STOPPING_NOTICE)?;
                connection.close().await;
                return Ok(());
            },
        }
    };

    connection.send_frame(&handshake_payload(&name)).await?;
    debug!(name = %name, "Handshake sent");

    // The server drops anyone whose relayed line would not fit in a frame
    let max_len = max_message_len(connection.max_frame_size(), &name);

    loop {
        console.prompt(MESSAGE_PROMPT)?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        if line.trim().is_empty() {
            continue;
        }
        if is_quit_command(&line) {
            break;
        }
        if line.len() > max_len {
            console.write_line(TOO_LONG_NOTICE)?;
            continue;
        }

        if let Err(e) = connection.send_frame(line.as_bytes()).await {
            warn!(error = %e, "Failed to send message");
            console.write_line(SEND_FAILED_NOTICE)?;
            connection.close().await;
            return Err(e);
        }
    }

    console.write_line(STOPPING_NOTICE)?;
    connection.close().await;
    Ok(())
}

/// Receiver path: print every relayed frame until the stream ends
async fn receive_loop<W: Write>(reader: &mut FrameReader, console: &Console<W>) -> Result<()> {
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                console.render_incoming(&String::from_utf8_lossy(&frame), MESSAGE_PROMPT)?;
            },
            Ok(None) => break,
            Err(e) if e.is_peer_closed() => break,
            Err(e) => {
                warn!(error = %e, "Receive failed");
                break;
            },
        }
    }

    console.write_line(DISCONNECTED_NOTICE)?;
    Ok(())
}

//! Length-prefixed message framing
//!
//! Each frame is a 4-byte big-endian payload length followed by the payload
//! bytes: `[u32 length][payload]`. Payloads are opaque, so they may contain
//! any bytes including newlines. Reads track how many bytes are still needed,
//! so a frame split across many TCP segments (or several frames coalesced in
//! one) decodes the same way.

use crate::error::{ChatError, ProtocolError, Result, TransportError};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Read one frame from the stream
///
/// Returns `Ok(None)` when the stream closes cleanly at a frame boundary.
///
/// # Errors
///
/// - `ProtocolError::FrameTooLarge` if the declared length exceeds `max_frame_size`
/// - `ProtocolError::TruncatedFrame` if the stream ends inside a frame
/// - `ChatError::PeerClosed` if the peer reset the connection
/// - `TransportError::ReceiveFailed` for any other stream error
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
    let received = read_fully(reader, &mut len_bytes).await?;
    if received == 0 {
        return Ok(None);
    }
    if received < LENGTH_PREFIX_LEN {
        return Err(ProtocolError::TruncatedFrame {
            expected: LENGTH_PREFIX_LEN,
            received,
        }
        .into());
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        }
        .into());
    }

    let mut payload = vec![0u8; len];
    let received = read_fully(reader, &mut payload).await?;
    if received < len {
        return Err(ProtocolError::TruncatedFrame {
            expected: len,
            received,
        }
        .into());
    }

    Ok(Some(payload))
}

/// Write one frame to the stream
///
/// The prefix and payload go out in a single buffered write followed by a
/// flush. Callers sharing a stream must serialize calls themselves.
///
/// # Errors
///
/// - `ProtocolError::FrameTooLarge` if the payload exceeds `max_frame_size`;
///   nothing is written in that case
/// - `TransportError::SendFailed` if the stream rejects the write
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = match u32::try_from(payload.len()) {
        Ok(len) if payload.len() <= max_frame_size => len,
        _ => {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: max_frame_size,
            }
            .into())
        },
    };

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);

    writer
        .write_all(&frame)
        .await
        .map_err(|e| TransportError::SendFailed {
            reason: format!("Failed to write frame: {}", e),
        })?;

    writer.flush().await.map_err(|e| TransportError::SendFailed {
        reason: format!("Failed to flush: {}", e),
    })?;

    Ok(())
}

/// Fill `buf` from the reader, returning how many bytes arrived before EOF
async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_disconnect(e.kind()) => return Err(ChatError::PeerClosed),
            Err(e) => {
                return Err(TransportError::ReceiveFailed {
                    reason: e.to_string(),
                }
                .into())
            },
        }
    }
    Ok(filled)
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}

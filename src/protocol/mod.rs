//! Chat wire formats
//!
//! Every message travels as one frame (see [`crate::network::framing`]).
//! The first frame a client sends is a handshake: the marker bytes
//! `__CONNECT__` immediately followed by the UTF-8 display name. Every later
//! frame is raw chat text. The server relays chat and presence changes to the
//! other clients as plain text frames:
//!
//! - `"<name> : <message>"` for chat
//! - `"<name> connected."` when a client completes its handshake
//! - `"<name> disconnected."` when an identified client goes away

use crate::error::ProtocolError;

/// Prefix that marks a handshake frame
pub const HANDSHAKE_MARKER: &[u8] = b"__CONNECT__";

/// Separator between the sender's name and the text of a relayed chat line
pub const CHAT_SEPARATOR: &[u8] = b" : ";

const JOINED_SUFFIX: &str = " connected.";
const LEFT_SUFFIX: &str = " disconnected.";

/// Largest number of bytes any name-carrying frame adds to the name
///
/// A display name must fit in a frame together with this overhead, which
/// covers the handshake marker and every presence announcement.
pub const NAME_FRAME_OVERHEAD: usize = if HANDSHAKE_MARKER.len() > LEFT_SUFFIX.len() {
    HANDSHAKE_MARKER.len()
} else {
    LEFT_SUFFIX.len()
};

/// Longest chat text `name` can send so the relayed line still fits in one
/// frame of `max_frame_size` bytes
pub fn max_message_len(max_frame_size: usize, name: &str) -> usize {
    max_frame_size.saturating_sub(name.len() + CHAT_SEPARATOR.len())
}

/// Build the handshake frame payload for a display name
pub fn handshake_payload(name: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(HANDSHAKE_MARKER.len() + name.len());
    payload.extend_from_slice(HANDSHAKE_MARKER);
    payload.extend_from_slice(name.as_bytes());
    payload
}

/// Whether a payload starts with the handshake marker
pub fn is_handshake(payload: &[u8]) -> bool {
    payload.starts_with(HANDSHAKE_MARKER)
}

/// Extract and validate the display name from a handshake payload
///
/// Surrounding whitespace is trimmed. The name must be valid UTF-8, free of
/// control characters, non-empty, and at most `max_name_len` bytes.
///
/// # Errors
///
/// - `MissingHandshake` if the payload lacks the marker
/// - `InvalidDisplayName` for non UTF-8 names or names with control characters
/// - `EmptyDisplayName` if nothing but whitespace follows the marker
/// - `DisplayNameTooLong` if the trimmed name exceeds `max_name_len`
pub fn parse_handshake(payload: &[u8], max_name_len: usize) -> Result<String, ProtocolError> {
    let raw = payload
        .strip_prefix(HANDSHAKE_MARKER)
        .ok_or(ProtocolError::MissingHandshake)?;

    let name = std::str::from_utf8(raw)
        .map_err(|e| ProtocolError::InvalidDisplayName {
            reason: format!("not valid UTF-8: {}", e),
        })?
        .trim();

    if name.is_empty() {
        return Err(ProtocolError::EmptyDisplayName);
    }

    if name.len() > max_name_len {
        return Err(ProtocolError::DisplayNameTooLong {
            len: name.len(),
            max: max_name_len,
        });
    }

    if name.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidDisplayName {
            reason: "contains control characters".to_string(),
        });
    }

    Ok(name.to_string())
}

/// A line the server relays to other clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement<'a> {
    /// A client completed its handshake
    Joined {
        /// Display name of the new client
        name: &'a str,
    },
    /// A client sent chat text
    Chat {
        /// Display name of the sender
        name: &'a str,
        /// Message bytes, relayed verbatim
        message: &'a [u8],
    },
    /// An identified client disconnected
    Left {
        /// Display name of the departed client
        name: &'a str,
    },
}

impl Announcement<'_> {
    /// Encode as a frame payload
    pub fn to_payload(&self) -> Vec<u8> {
        match self {
            Self::Joined { name } => format!("{}{}", name, JOINED_SUFFIX).into_bytes(),
            Self::Chat { name, message } => {
                let mut payload =
                    Vec::with_capacity(name.len() + CHAT_SEPARATOR.len() + message.len());
                payload.extend_from_slice(name.as_bytes());
                payload.extend_from_slice(CHAT_SEPARATOR);
                payload.extend_from_slice(message);
                payload
            },
            Self::Left { name } => format!("{}{}", name, LEFT_SUFFIX).into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_payload_layout() {
        let payload = handshake_payload("Alice");
        assert_eq!(payload, b"__CONNECT__Alice");
        assert!(is_handshake(&payload));
        assert!(!is_handshake(b"hello"));
    }

    #[test]
    fn test_parse_handshake() {
        assert_eq!(parse_handshake(b"__CONNECT__Alice", 64).unwrap(), "Alice");
        assert_eq!(parse_handshake(b"__CONNECT__  Bob \n", 64).unwrap(), "Bob");
        assert_eq!(
            parse_handshake("__CONNECT__Zoë".as_bytes(), 64).unwrap(),
            "Zoë"
        );
    }

    #[test]
    fn test_parse_handshake_without_marker() {
        assert_eq!(
            parse_handshake(b"hello everyone", 64),
            Err(ProtocolError::MissingHandshake)
        );
        assert_eq!(
            parse_handshake(b"__CONNECT_Alice", 64),
            Err(ProtocolError::MissingHandshake)
        );
    }

    #[test]
    fn test_parse_handshake_empty_name() {
        assert_eq!(
            parse_handshake(b"__CONNECT__", 64),
            Err(ProtocolError::EmptyDisplayName)
        );
        assert_eq!(
            parse_handshake(b"__CONNECT__   ", 64),
            Err(ProtocolError::EmptyDisplayName)
        );
    }

    #[test]
    fn test_parse_handshake_name_too_long() {
        let payload = handshake_payload(&"x".repeat(65));
        assert_eq!(
            parse_handshake(&payload, 64),
            Err(ProtocolError::DisplayNameTooLong { len: 65, max: 64 })
        );
        assert!(parse_handshake(&handshake_payload(&"x".repeat(64)), 64).is_ok());
    }

    #[test]
    fn test_parse_handshake_invalid_names() {
        assert!(matches!(
            parse_handshake(b"__CONNECT__\xff\xfe", 64),
            Err(ProtocolError::InvalidDisplayName { .. })
        ));
        assert!(matches!(
            parse_handshake(b"__CONNECT__Al\nice", 64),
            Err(ProtocolError::InvalidDisplayName { .. })
        ));
    }

    #[test]
    fn test_announcement_formats() {
        assert_eq!(
            Announcement::Joined { name: "Alice" }.to_payload(),
            b"Alice connected."
        );
        assert_eq!(
            Announcement::Chat {
                name: "Alice",
                message: b"hello"
            }
            .to_payload(),
            b"Alice : hello"
        );
        assert_eq!(
            Announcement::Left { name: "Alice" }.to_payload(),
            b"Alice disconnected."
        );
    }

    #[test]
    fn test_message_budget_fits_relayed_line() {
        assert_eq!(max_message_len(1024, "Alice"), 1024 - 5 - 3);
        assert_eq!(max_message_len(4, "Alice"), 0);

        let message = vec![b'x'; max_message_len(64, "Bob")];
        let line = Announcement::Chat {
            name: "Bob",
            message: &message,
        }
        .to_payload();
        assert_eq!(line.len(), 64);
    }

    #[test]
    fn test_name_overhead_covers_every_name_frame() {
        let name = "n".repeat(20);
        let frames = [
            handshake_payload(&name),
            Announcement::Joined { name: &name }.to_payload(),
            Announcement::Left { name: &name }.to_payload(),
        ];
        for frame in frames {
            assert!(frame.len() <= name.len() + NAME_FRAME_OVERHEAD);
        }
    }

    #[test]
    fn test_chat_payload_is_verbatim() {
        let message = b"bytes \x00\xff and\nnewlines";
        let payload = Announcement::Chat {
            name: "Bob",
            message,
        }
        .to_payload();

        assert!(payload.starts_with(b"Bob : "));
        assert_eq!(&payload[6..], message);
    }
}

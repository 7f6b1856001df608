//! Hub buffer decoding
//!
//! The hub keeps a small ring of PLM traffic which it serves as hex text
//! inside `<response><BS>...</BS></response>`. A decode pass walks the hex
//! from the start, one `02XX` message at a time, using the dispatch table in
//! [`crate::message`]. Decoding is pure: clearing the buffer afterwards is
//! the hub client's job.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::device::DeviceId;
use crate::message::{self, Message, MessageKind, Shape, SEND_MESSAGE_PREFIX};

/// Length of a full 2245-222 buffer: 200 hex chars of data plus the cursor
pub const FULL_BUFFER_LEN: usize = 202;

/// Data area of a full buffer
const BUFFER_DATA_LEN: usize = 200;

/// Why a decode pass stopped before the end of the buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid message header {0:?}")]
    InvalidHeader(String),
    #[error("Unknown message type 02{0:02X}")]
    UnknownCode(u8),
    #[error("Unhandled message type 02{code:02X} ({description})")]
    Unimplemented {
        code: u8,
        description: &'static str,
    },
    #[error("Message 02{code:02X} truncated: needs {needed} chars, {available} left")]
    Truncated {
        code: u8,
        needed: usize,
        available: usize,
    },
    #[error("Send message flags {0:?} are not hex")]
    InvalidFlags(String),
    #[error("Buffer contains non-ASCII data")]
    NotAscii,
}

/// The result of one decode pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub success: bool,
    pub message: String,
    pub messages: Vec<Message>,
    /// Set when decoding stopped early; messages before the stop are kept
    pub halted: Option<DecodeError>,
}

impl BufferSnapshot {
    fn new() -> Self {
        Self {
            success: true,
            message: String::new(),
            messages: Vec::new(),
            halted: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// First message matching a predicate
    pub fn find<F>(&self, mut pred: F) -> Option<&Message>
    where
        F: FnMut(&Message) -> bool,
    {
        self.messages.iter().find(|m| pred(m))
    }

    /// Messages a device sent to the hub
    pub fn from_device<'a>(&'a self, device: &'a DeviceId) -> impl Iterator<Item = &'a Message> {
        self.messages.iter().filter(move |m| m.is_from(device))
    }

    /// The hub's echo of a modem command, e.g. `0269` for get first link
    pub fn echo(&self, kind: MessageKind) -> Option<&Message> {
        self.messages.iter().find(|m| m.kind == kind)
    }

    fn halt(&mut self, err: DecodeError) {
        debug!(error = %err, decoded = self.messages.len(), "Buffer decode stopped");
        self.halted = Some(err);
    }
}

#[derive(Debug, Deserialize)]
struct BufferStatus {
    #[serde(rename = "BS", default)]
    bs: String,
}

/// Pull the hex text out of a `buffstatus.xml` body
///
/// A body without the XML wrapper is returned trimmed; XML without a
/// readable `BS` element yields nothing.
pub fn extract_hex(body: &str) -> String {
    let body = body.trim();
    if !body.starts_with('<') {
        return body.to_string();
    }
    match quick_xml::de::from_str::<BufferStatus>(body) {
        Ok(status) => status.bs.trim().to_string(),
        Err(e) => {
            warn!(error = %e, "Unreadable buffer XML");
            String::new()
        }
    }
}

/// Decode a raw `buffstatus.xml` body
pub fn decode_response(body: &str) -> BufferSnapshot {
    decode(&extract_hex(body))
}

/// Decode the hex text of a hub buffer
pub fn decode(hex: &str) -> BufferSnapshot {
    let mut snapshot = BufferSnapshot::new();

    if hex.is_empty() {
        snapshot.success = false;
        snapshot.message = "Empty buffer".to_string();
        return snapshot;
    }
    if !hex.is_ascii() {
        snapshot.halt(DecodeError::NotAscii);
        return snapshot;
    }

    let text = apply_cursor(hex);
    debug!(buffer = text, "Decoding hub buffer");

    let mut pos = 0;
    while text.len() - pos >= 4 {
        let header = &text[pos..pos + 4];
        if header == "0000" {
            break;
        }

        let code = match u8::from_str_radix(&header[2..4], 16) {
            Ok(code) if header.starts_with("02") => code,
            _ => {
                snapshot.halt(DecodeError::InvalidHeader(header.to_string()));
                break;
            }
        };

        let Some(layout) = message::layout(code) else {
            snapshot.halt(DecodeError::UnknownCode(code));
            break;
        };

        let available = text.len() - pos;
        let (kind, shape) = match layout.shape {
            Shape::SendMessage => {
                if available < SEND_MESSAGE_PREFIX {
                    snapshot.halt(DecodeError::Truncated {
                        code,
                        needed: SEND_MESSAGE_PREFIX,
                        available,
                    });
                    break;
                }
                let flags = &text[pos + 10..pos + 12];
                match u8::from_str_radix(flags, 16) {
                    Ok(flags) => message::send_message_shape(flags),
                    Err(_) => {
                        snapshot.halt(DecodeError::InvalidFlags(flags.to_string()));
                        break;
                    }
                }
            }
            shape => (layout.kind, shape),
        };

        let Shape::Fixed { len, fields } = shape else {
            snapshot.halt(DecodeError::Unimplemented {
                code,
                description: kind.description(),
            });
            break;
        };

        if len > available {
            snapshot.halt(DecodeError::Truncated {
                code,
                needed: len,
                available,
            });
            break;
        }

        let msg = Message::from_layout(code, kind, text[pos..pos + len].to_string(), fields);
        trace!(code = %format!("{:02X}", code), raw = %msg.raw, "{}", msg.description());

        if msg.is_nak() {
            snapshot.success = false;
            snapshot.message = "Device returned nak".to_string();
        }
        snapshot.messages.push(msg);
        pos += len;
    }

    snapshot
}

/// A full buffer ends in a write cursor; data past it is stale
fn apply_cursor(text: &str) -> &str {
    if text.len() != FULL_BUFFER_LEN {
        return text;
    }
    match usize::from_str_radix(&text[BUFFER_DATA_LEN..], 16) {
        Ok(cursor) => &text[..cursor.min(BUFFER_DATA_LEN)],
        Err(_) => {
            debug!(cursor = &text[BUFFER_DATA_LEN..], "Unreadable buffer cursor");
            &text[..BUFFER_DATA_LEN]
        }
    }
}

//! Frame codec for the terminal channels.
//!
//! Two outbound shapes share the socket: raw keystroke payloads and JSON
//! control frames. They are produced by separate encode calls, so nothing
//! on the decode side ever has to guess which one it is looking at.
//! Inbound traffic is always terminal output.

pub mod port;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ASCII ETX. On run-log sessions this byte is a request to stop the
/// remote process rather than a keystroke.
pub const INTERRUPT: u8 = 0x03;

/// Text command asking the run-log service to terminate the process.
pub const STOP_COMMAND: &str = "STOP";

/// One message at the transport's message boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WireMessage::Text(text) => text.as_bytes(),
            WireMessage::Binary(bytes) => bytes,
        }
    }
}

/// Structured out-of-band frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Resize { cols: u16, rows: u16 },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode control frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unexpected binary message ({len} bytes) on a text channel")]
    UnexpectedBinary { len: usize },
}

/// Encode keystroke bytes for the wire.
///
/// The terminal services read text frames, so valid UTF-8 goes out as
/// text; anything else is passed through as a binary frame untouched.
pub fn encode_raw(bytes: &[u8]) -> WireMessage {
    match std::str::from_utf8(bytes) {
        Ok(text) => WireMessage::Text(text.to_owned()),
        Err(_) => WireMessage::Binary(Bytes::copy_from_slice(bytes)),
    }
}

pub fn encode_control(frame: &ControlFrame) -> Result<WireMessage, CodecError> {
    Ok(WireMessage::Text(serde_json::to_string(frame)?))
}

pub fn encode_stop() -> WireMessage {
    WireMessage::Text(STOP_COMMAND.to_string())
}

/// Decode one inbound message into the bytes to render.
pub fn decode(message: WireMessage) -> Result<Bytes, CodecError> {
    match message {
        WireMessage::Text(text) => Ok(Bytes::from(text)),
        WireMessage::Binary(bytes) => Err(CodecError::UnexpectedBinary { len: bytes.len() }),
    }
}

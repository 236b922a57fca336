//! Physical connections backing terminal sessions.
//!
//! A [`Connection`] is opened by a [`Connector`] and reports everything that
//! happens to it as [`TransportEvent`]s: exactly one `Opened` (unless it
//! fails first), any number of `Message`s in arrival order, and exactly one
//! `Closed`. Opening never fails synchronously; a refused or dropped socket
//! shows up as an abnormal `Closed`.

pub mod endpoint;
pub mod mock;
pub mod websocket;

use std::fmt;

use tokio::sync::mpsc;
use url::Url;

use crate::protocol::WireMessage;

pub use endpoint::EndpointConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Websocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// User-initiated shutdown; suppresses reconnection.
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// Peer closed without sending a status code.
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    /// Dropped without a close handshake (network failure, refused, reset).
    pub const ABNORMAL: CloseCode = CloseCode(1006);

    pub fn is_normal(self) -> bool {
        self == Self::NORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::NORMAL, reason)
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::ABNORMAL, reason)
    }

    pub fn is_normal(&self) -> bool {
        self.code.is_normal()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed(CloseFrame),
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Opened,
    Message(WireMessage),
    Closed(CloseFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub connection: ConnectionId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn opened(connection: ConnectionId) -> Self {
        Self {
            connection,
            kind: TransportEventKind::Opened,
        }
    }

    pub fn message(connection: ConnectionId, message: WireMessage) -> Self {
        Self {
            connection,
            kind: TransportEventKind::Message(message),
        }
    }

    pub fn closed(connection: ConnectionId, frame: CloseFrame) -> Self {
        Self {
            connection,
            kind: TransportEventKind::Closed(frame),
        }
    }
}

pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// One live duplex channel. Owned exclusively by the driver and never
/// reused once closed.
pub trait Connection: Send {
    fn id(&self) -> ConnectionId;

    fn status(&self) -> ConnectionStatus;

    /// Queue a message. Silently dropped unless the connection is open.
    fn send(&self, message: WireMessage);

    /// Begin shutdown with the given status code.
    fn close(&self, code: CloseCode);
}

/// Opens connections. Implementations must report the outcome through
/// `events` rather than by failing here.
pub trait Connector: Send {
    fn open(&self, id: ConnectionId, endpoint: &Url, events: TransportEvents)
    -> Box<dyn Connection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_1000_is_normal() {
        assert!(CloseCode::NORMAL.is_normal());
        assert!(!CloseCode::ABNORMAL.is_normal());
        assert!(!CloseCode::NO_STATUS.is_normal());
        assert!(!CloseCode(1011).is_normal());
        assert!(CloseFrame::normal("bye").is_normal());
    }
}

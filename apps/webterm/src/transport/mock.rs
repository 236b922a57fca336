//! In-memory connector used by tests and headless embedding.
//!
//! Nothing happens on the "network" until the test says so: connections stay
//! `Connecting` until [`MockHandle::accept`] and only close when
//! [`MockHandle::drop_connection`] is called or the client closes them.

use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use super::{
    CloseCode, CloseFrame, Connection, ConnectionId, ConnectionStatus, Connector, TransportEvent,
    TransportEvents,
};
use crate::protocol::WireMessage;

#[derive(Debug)]
pub struct MockConnectionRecord {
    pub id: ConnectionId,
    pub endpoint: Url,
    pub status: ConnectionStatus,
    pub sent: Vec<WireMessage>,
    pub closed_with: Option<CloseCode>,
    events: TransportEvents,
}

#[derive(Debug, Default)]
struct MockState {
    connections: Vec<MockConnectionRecord>,
}

impl MockState {
    fn record_mut(&mut self, id: ConnectionId) -> Option<&mut MockConnectionRecord> {
        self.connections.iter_mut().find(|record| record.id == id)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> (Self, MockHandle) {
        let connector = Self::default();
        let handle = MockHandle {
            state: connector.state.clone(),
        };
        (connector, handle)
    }
}

impl Connector for MockConnector {
    fn open(
        &self,
        id: ConnectionId,
        endpoint: &Url,
        events: TransportEvents,
    ) -> Box<dyn Connection> {
        self.state.lock().connections.push(MockConnectionRecord {
            id,
            endpoint: endpoint.clone(),
            status: ConnectionStatus::Connecting,
            sent: Vec::new(),
            closed_with: None,
            events,
        });
        Box::new(MockConnection {
            id,
            state: self.state.clone(),
        })
    }
}

struct MockConnection {
    id: ConnectionId,
    state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn status(&self) -> ConnectionStatus {
        self.state
            .lock()
            .record_mut(self.id)
            .map(|record| record.status.clone())
            .unwrap_or_else(|| ConnectionStatus::Closed(CloseFrame::abnormal("unknown connection")))
    }

    fn send(&self, message: WireMessage) {
        let mut state = self.state.lock();
        if let Some(record) = state.record_mut(self.id) {
            if record.status.is_open() {
                record.sent.push(message);
            }
        }
    }

    fn close(&self, code: CloseCode) {
        let mut state = self.state.lock();
        if let Some(record) = state.record_mut(self.id) {
            if matches!(record.status, ConnectionStatus::Closed(_)) {
                return;
            }
            let frame = CloseFrame::new(code, "closed by client");
            record.closed_with = Some(code);
            record.status = ConnectionStatus::Closed(frame.clone());
            let _ = record.events.send(TransportEvent::closed(self.id, frame));
        }
    }
}

/// Test-side control over the mock network.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state
            .lock()
            .connections
            .iter()
            .map(|record| record.id)
            .collect()
    }

    pub fn latest(&self) -> Option<ConnectionId> {
        self.state.lock().connections.last().map(|record| record.id)
    }

    pub fn endpoint(&self, id: ConnectionId) -> Option<Url> {
        self.state
            .lock()
            .record_mut(id)
            .map(|record| record.endpoint.clone())
    }

    pub fn status(&self, id: ConnectionId) -> Option<ConnectionStatus> {
        self.state
            .lock()
            .record_mut(id)
            .map(|record| record.status.clone())
    }

    pub fn closed_with(&self, id: ConnectionId) -> Option<CloseCode> {
        self.state
            .lock()
            .record_mut(id)
            .and_then(|record| record.closed_with)
    }

    /// Messages the client has sent on `id` so far.
    pub fn sent(&self, id: ConnectionId) -> Vec<WireMessage> {
        self.state
            .lock()
            .record_mut(id)
            .map(|record| record.sent.clone())
            .unwrap_or_default()
    }

    /// Complete the handshake for a pending connection.
    pub fn accept(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        if let Some(record) = state.record_mut(id) {
            if matches!(record.status, ConnectionStatus::Connecting) {
                record.status = ConnectionStatus::Open;
                let _ = record.events.send(TransportEvent::opened(id));
            }
        }
    }

    /// Deliver a text frame from the "server".
    pub fn push_text(&self, id: ConnectionId, text: &str) {
        self.push(id, WireMessage::Text(text.to_string()));
    }

    pub fn push(&self, id: ConnectionId, message: WireMessage) {
        let mut state = self.state.lock();
        if let Some(record) = state.record_mut(id) {
            if record.status.is_open() {
                let _ = record.events.send(TransportEvent::message(id, message));
            }
        }
    }

    /// Close from the "server" side (or simulate a network drop).
    pub fn drop_connection(&self, id: ConnectionId, code: CloseCode) {
        let mut state = self.state.lock();
        if let Some(record) = state.record_mut(id) {
            if matches!(record.status, ConnectionStatus::Closed(_)) {
                return;
            }
            let frame = CloseFrame::new(code, "closed by server");
            record.status = ConnectionStatus::Closed(frame.clone());
            let _ = record.events.send(TransportEvent::closed(id, frame));
        }
    }
}

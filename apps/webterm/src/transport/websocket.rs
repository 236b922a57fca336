use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tracing::{debug, trace, warn};
use url::Url;

use super::{
    CloseCode, CloseFrame, Connection, ConnectionId, ConnectionStatus, Connector, TransportEvent,
    TransportEvents,
};
use crate::protocol::WireMessage;
use crate::telemetry::logging::hexdump;

const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

enum Outbound {
    Message(WireMessage),
    Close(CloseCode),
}

/// Opens websocket connections with `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(
        &self,
        id: ConnectionId,
        endpoint: &Url,
        events: TransportEvents,
    ) -> Box<dyn Connection> {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(ConnectionStatus::Connecting));
        tokio::spawn(run_connection(
            id,
            endpoint.clone(),
            rx,
            events,
            status.clone(),
        ));
        Box::new(WebSocketConnection {
            id,
            outbound: tx,
            status,
        })
    }
}

pub struct WebSocketConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    status: Arc<Mutex<ConnectionStatus>>,
}

impl Connection for WebSocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn status(&self) -> ConnectionStatus {
        self.status.lock().clone()
    }

    fn send(&self, message: WireMessage) {
        if !self.status.lock().is_open() {
            trace!(
                target: "webterm::transport",
                connection = %self.id,
                bytes = message.len(),
                "dropping send on connection that is not open"
            );
            return;
        }
        if self.outbound.send(Outbound::Message(message)).is_err() {
            trace!(target: "webterm::transport", connection = %self.id, "connection task gone; send dropped");
        }
    }

    fn close(&self, code: CloseCode) {
        let _ = self.outbound.send(Outbound::Close(code));
    }
}

async fn run_connection(
    id: ConnectionId,
    endpoint: Url,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: TransportEvents,
    status: Arc<Mutex<ConnectionStatus>>,
) {
    debug!(target: "webterm::transport", connection = %id, url = %endpoint, "connecting");
    let stream = tokio::select! {
        result = connect_async(endpoint.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(err) => {
                warn!(target: "webterm::transport", connection = %id, url = %endpoint, error = %err, "connect failed");
                finish(id, &events, &status, CloseFrame::abnormal(err.to_string()));
                return;
            }
        },
        // A close requested before the socket is up wins.
        request = wait_for_close(&mut outbound) => {
            finish(id, &events, &status, CloseFrame::new(request, "closed before open"));
            return;
        }
    };

    *status.lock() = ConnectionStatus::Open;
    debug!(target: "webterm::transport", connection = %id, "connected");
    if events.send(TransportEvent::opened(id)).is_err() {
        return;
    }

    let (mut sink, mut stream) = stream.split();
    let close = loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Message(message)) => {
                    trace!(
                        target: "webterm::transport",
                        connection = %id,
                        bytes = message.len(),
                        dump = %hexdump(message.as_bytes()),
                        "outbound frame"
                    );
                    let frame = match message {
                        WireMessage::Text(text) => Message::Text(text),
                        WireMessage::Binary(bytes) => Message::Binary(bytes.to_vec()),
                    };
                    if let Err(err) = sink.send(frame).await {
                        break CloseFrame::abnormal(err.to_string());
                    }
                }
                Some(Outbound::Close(code)) => {
                    let frame = WsCloseFrame {
                        code: code.0.into(),
                        reason: Cow::Borrowed(""),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    // Give the peer a moment to echo the close.
                    let _ = timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
                        while let Some(Ok(message)) = stream.next().await {
                            if matches!(message, Message::Close(_)) {
                                break;
                            }
                        }
                    })
                    .await;
                    break CloseFrame::new(code, "closed by client");
                }
                None => break CloseFrame::normal("connection handle dropped"),
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    trace!(target: "webterm::transport", connection = %id, dump = %hexdump(text.as_bytes()), "inbound text");
                    if events.send(TransportEvent::message(id, WireMessage::Text(text))).is_err() {
                        break CloseFrame::normal("event receiver dropped");
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let message = WireMessage::Binary(Bytes::from(data));
                    if events.send(TransportEvent::message(id, message)).is_err() {
                        break CloseFrame::normal("event receiver dropped");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => CloseFrame::new(CloseCode(frame.code.into()), frame.reason.into_owned()),
                        None => CloseFrame::new(CloseCode::NO_STATUS, "closed without status"),
                    };
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => break CloseFrame::abnormal(err.to_string()),
                None => break CloseFrame::abnormal("stream ended without close frame"),
            },
        }
    };

    debug!(
        target: "webterm::transport",
        connection = %id,
        code = %close.code,
        reason = %close.reason,
        "connection closed"
    );
    finish(id, &events, &status, close);
}

async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> CloseCode {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close(code)) => return code,
            // Sends are refused before open, so nothing else should be queued.
            Some(Outbound::Message(_)) => continue,
            None => return CloseCode::NORMAL,
        }
    }
}

fn finish(
    id: ConnectionId,
    events: &TransportEvents,
    status: &Arc<Mutex<ConnectionStatus>>,
    close: CloseFrame,
) {
    *status.lock() = ConnectionStatus::Closed(close.clone());
    let _ = events.send(TransportEvent::closed(id, close));
}

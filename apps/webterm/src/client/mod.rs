//! Async driver for the session registry.
//!
//! [`SessionDriver`] owns the registry, the live connections and the
//! timers, and runs on a single task: every registry mutation happens
//! there, so sessions never see interleaved operations. Callers talk to
//! it through a cloneable [`DriverHandle`].

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::protocol::port::PortTracker;
use crate::session::{
    Effect, Geometry, SessionError, SessionId, SessionKind, SessionParams, SessionRegistry,
    SessionStatus, SurfaceFactory, TimerKind,
};
use crate::transport::{
    Connection, ConnectionId, Connector, TransportEvent, TransportEventKind,
};

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub kind: SessionKind,
    pub label: String,
    pub status: SessionStatus,
    pub reconnect_attempts: u32,
    pub connection: Option<ConnectionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub focused: Option<SessionId>,
    pub sessions: Vec<SessionSummary>,
}

enum Command {
    Open {
        kind: SessionKind,
        params: SessionParams,
        reply: oneshot::Sender<Result<SessionId, SessionError>>,
    },
    Input(Bytes),
    InputTo(SessionId, Bytes),
    Resize(SessionId, Geometry),
    ResizeAll(Geometry),
    Activate(SessionId),
    ActivateNth(usize),
    CycleFocus { forward: bool },
    Close(SessionId),
    CloseFocused,
    StopAll(oneshot::Sender<usize>),
    ClearFocused,
    Snapshot(oneshot::Sender<RegistrySnapshot>),
    Shutdown(oneshot::Sender<()>),
}

struct TimerFired {
    session: SessionId,
    timer: TimerKind,
    generation: u64,
}

pub struct SessionDriver {
    registry: SessionRegistry,
    connector: Box<dyn Connector>,
    connections: HashMap<ConnectionId, Box<dyn Connection>>,
    timers: HashMap<(SessionId, TimerKind), (u64, JoinHandle<()>)>,
    timer_generation: u64,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl SessionDriver {
    pub fn new(
        config: ClientConfig,
        connector: impl Connector + 'static,
        surfaces: impl SurfaceFactory + 'static,
    ) -> (Self, DriverHandle) {
        let registry = SessionRegistry::init(config, surfaces);
        let ports = registry.port_tracker().clone();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let driver = Self {
            registry,
            connector: Box::new(connector),
            connections: HashMap::new(),
            timers: HashMap::new(),
            timer_generation: 0,
            transport_tx,
            transport_rx,
            timer_tx,
            timer_rx,
            commands,
        };
        let handle = DriverHandle {
            commands: command_tx,
            ports,
        };
        (driver, handle)
    }

    /// Run the driver on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = self.transport_rx.recv() => {
                    if matches!(event.kind, TransportEventKind::Closed(_)) {
                        self.connections.remove(&event.connection);
                    }
                    self.registry.handle_transport(event);
                }
                Some(fired) = self.timer_rx.recv() => {
                    let key = (fired.session, fired.timer);
                    match self.timers.get(&key) {
                        Some((generation, _)) if *generation == fired.generation => {
                            self.timers.remove(&key);
                            self.registry.handle_timer(fired.session, fired.timer);
                        }
                        _ => trace!(target: "webterm::client", session = %fired.session, timer = ?fired.timer, "superseded timer ignored"),
                    }
                }
            }
            self.apply_effects();
        }
        debug!(target: "webterm::client", "session driver stopped");
    }

    fn shutdown(&mut self) {
        self.registry.shutdown();
        self.apply_effects();
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open {
                kind,
                params,
                reply,
            } => {
                let _ = reply.send(self.registry.open(kind, params));
            }
            Command::Input(bytes) => self.registry.input(&bytes),
            Command::InputTo(id, bytes) => log_error(self.registry.input_to(id, &bytes)),
            Command::Resize(id, geometry) => log_error(self.registry.resize(id, geometry)),
            Command::ResizeAll(geometry) => self.registry.resize_all(geometry),
            Command::Activate(id) => log_error(self.registry.activate(id)),
            Command::ActivateNth(index) => log_error(self.registry.activate_nth(index).map(|_| ())),
            Command::CycleFocus { forward } => {
                self.registry.cycle_focus(forward);
            }
            Command::Close(id) => log_error(self.registry.close(id)),
            Command::CloseFocused => {
                if let Some(id) = self.registry.focused() {
                    log_error(self.registry.close(id));
                }
            }
            Command::StopAll(reply) => {
                let _ = reply.send(self.registry.stop_all());
            }
            Command::ClearFocused => self.registry.clear_focused(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(_) => {}
        }
    }

    fn snapshot(&self) -> RegistrySnapshot {
        let sessions = self
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| self.registry.session(id))
            .map(|session| SessionSummary {
                id: session.id(),
                kind: session.kind(),
                label: session.label().to_string(),
                status: session.status(),
                reconnect_attempts: session.reconnect_attempts(),
                connection: session.connection(),
            })
            .collect();
        RegistrySnapshot {
            focused: self.registry.focused(),
            sessions,
        }
    }

    fn apply_effects(&mut self) {
        for effect in self.registry.drain_effects() {
            match effect {
                Effect::Connect {
                    session,
                    connection,
                    endpoint,
                } => {
                    debug!(target: "webterm::client", session = %session, connection = %connection, url = %endpoint, "opening connection");
                    let handle =
                        self.connector
                            .open(connection, &endpoint, self.transport_tx.clone());
                    self.connections.insert(connection, handle);
                }
                Effect::Send {
                    connection,
                    message,
                } => match self.connections.get(&connection) {
                    Some(handle) => handle.send(message),
                    None => trace!(target: "webterm::client", connection = %connection, "send to retired connection dropped"),
                },
                Effect::Disconnect { connection, code } => {
                    if let Some(handle) = self.connections.remove(&connection) {
                        handle.close(code);
                    }
                }
                Effect::StartTimer {
                    session,
                    timer,
                    delay,
                } => {
                    self.timer_generation += 1;
                    let generation = self.timer_generation;
                    let tx = self.timer_tx.clone();
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(TimerFired {
                            session,
                            timer,
                            generation,
                        });
                    });
                    if let Some((_, previous)) = self.timers.insert((session, timer), (generation, task)) {
                        previous.abort();
                    }
                }
                Effect::CancelTimers { session } => {
                    self.timers.retain(|(owner, _), (_, task)| {
                        if *owner == session {
                            task.abort();
                            false
                        } else {
                            true
                        }
                    });
                }
            }
        }
    }
}

fn log_error(result: Result<(), SessionError>) {
    if let Err(err) = result {
        warn!(target: "webterm::client", error = %err, "session command failed");
    }
}

/// Cloneable handle for sending commands to a running [`SessionDriver`].
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::UnboundedSender<Command>,
    ports: PortTracker,
}

impl DriverHandle {
    /// The process-wide last detected port.
    pub fn ports(&self) -> &PortTracker {
        &self.ports
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::DriverStopped)
    }

    pub async fn open(
        &self,
        kind: SessionKind,
        params: SessionParams,
    ) -> Result<SessionId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Open {
            kind,
            params,
            reply,
        })?;
        rx.await.map_err(|_| SessionError::DriverStopped)?
    }

    /// Keystrokes for whichever session has focus.
    pub fn input(&self, bytes: impl Into<Bytes>) -> Result<(), SessionError> {
        self.send(Command::Input(bytes.into()))
    }

    pub fn input_to(&self, id: SessionId, bytes: impl Into<Bytes>) -> Result<(), SessionError> {
        self.send(Command::InputTo(id, bytes.into()))
    }

    pub fn resize(&self, id: SessionId, geometry: Geometry) -> Result<(), SessionError> {
        self.send(Command::Resize(id, geometry))
    }

    pub fn resize_all(&self, geometry: Geometry) -> Result<(), SessionError> {
        self.send(Command::ResizeAll(geometry))
    }

    pub fn activate(&self, id: SessionId) -> Result<(), SessionError> {
        self.send(Command::Activate(id))
    }

    pub fn activate_nth(&self, index: usize) -> Result<(), SessionError> {
        self.send(Command::ActivateNth(index))
    }

    pub fn cycle_focus(&self, forward: bool) -> Result<(), SessionError> {
        self.send(Command::CycleFocus { forward })
    }

    pub fn close(&self, id: SessionId) -> Result<(), SessionError> {
        self.send(Command::Close(id))
    }

    pub fn close_focused(&self) -> Result<(), SessionError> {
        self.send(Command::CloseFocused)
    }

    /// Ask every open run log to stop; resolves to how many were asked.
    pub async fn stop_all(&self) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StopAll(reply))?;
        rx.await.map_err(|_| SessionError::DriverStopped)
    }

    pub fn clear_focused(&self) -> Result<(), SessionError> {
        self.send(Command::ClearFocused)
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| SessionError::DriverStopped)
    }

    /// Close every session cleanly and stop the driver.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply))?;
        rx.await.map_err(|_| SessionError::DriverStopped)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::WireMessage;
    use crate::session::surface::MemorySurfaceFactory;
    use crate::transport::mock::{MockConnector, MockHandle};
    use crate::transport::CloseCode;

    struct Harness {
        handle: DriverHandle,
        network: MockHandle,
        surfaces: MemorySurfaceFactory,
        driver: JoinHandle<()>,
    }

    fn start() -> Harness {
        let (connector, network) = MockConnector::new();
        let surfaces = MemorySurfaceFactory::new();
        let (driver, handle) =
            SessionDriver::new(ClientConfig::default(), connector, surfaces.clone());
        Harness {
            handle,
            network,
            surfaces,
            driver: driver.spawn(),
        }
    }

    /// Let the driver drain its queues without crossing a batch window.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn open_shell(harness: &Harness) -> (SessionId, ConnectionId) {
        let id = harness
            .handle
            .open(SessionKind::Interactive, SessionParams::default())
            .await
            .unwrap();
        let connection = harness.network.latest().unwrap();
        harness.network.accept(connection);
        settle().await;
        (id, connection)
    }

    fn raw_sends(network: &MockHandle, connection: ConnectionId) -> Vec<WireMessage> {
        network
            .sent(connection)
            .into_iter()
            .filter(|message| !message.as_bytes().starts_with(b"{\"type\""))
            .collect()
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn keystrokes_in_one_window_arrive_as_one_message() {
        let harness = start();
        let (_, connection) = open_shell(&harness).await;

        harness.handle.input(&b"l"[..]).unwrap();
        harness.handle.input(&b"s"[..]).unwrap();
        harness.handle.input(&b"\n"[..]).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            harness.network.sent(connection),
            vec![
                WireMessage::Text(r#"{"type":"resize","cols":120,"rows":30}"#.to_string()),
                WireMessage::Text("ls\n".to_string()),
            ]
        );
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn output_is_rendered_on_the_next_tick() {
        let harness = start();
        let (id, connection) = open_shell(&harness).await;
        let surface = harness.surfaces.latest(id).unwrap();
        let before = surface.output_writes();

        harness.network.push_text(connection, "hello ");
        harness.network.push_text(connection, "world");
        settle().await;
        assert_eq!(surface.output_writes(), before);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(surface.output_writes(), before + 1);
        assert!(surface.text().ends_with("hello world"));
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn dropped_connection_is_replaced_after_backoff() {
        let harness = start();
        let (id, first) = open_shell(&harness).await;

        harness.network.drop_connection(first, CloseCode::ABNORMAL);
        settle().await;
        assert_eq!(harness.network.connection_ids(), vec![first]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let second = harness.network.latest().unwrap();
        assert_ne!(first, second);
        assert_eq!(
            harness.network.endpoint(first),
            harness.network.endpoint(second)
        );

        harness.network.accept(second);
        settle().await;
        let snapshot = harness.handle.snapshot().await.unwrap();
        let session = &snapshot.sessions[0];
        assert_eq!(session.id, id);
        assert_eq!(session.status, SessionStatus::Open);
        assert_eq!(session.reconnect_attempts, 0);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn closing_a_session_sends_normal_close_and_never_reconnects() {
        let harness = start();
        let (id, connection) = open_shell(&harness).await;

        harness.handle.input(&b"partial"[..]).unwrap();
        harness.handle.close(id).unwrap();
        // Well past the 3s reconnect delay.
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(harness.network.closed_with(connection), Some(CloseCode::NORMAL));
        assert_eq!(harness.network.connection_ids(), vec![connection]);
        assert!(raw_sends(&harness.network, connection).is_empty());
        assert!(harness.handle.snapshot().await.unwrap().sessions.is_empty());
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn stop_all_reaches_run_logs_and_ports_are_published() {
        let harness = start();
        open_shell(&harness).await;
        harness
            .handle
            .open(SessionKind::RunLog, SessionParams::for_project("demo"))
            .await
            .unwrap();
        let run = harness.network.latest().unwrap();
        harness.network.accept(run);
        settle().await;

        let mut ports = harness.handle.ports().subscribe();
        harness
            .network
            .push_text(run, "\x1b[32m[PORT DETECTED] 8081\x1b[0m\r\n");
        ports.changed().await.unwrap();
        assert_eq!(*ports.borrow(), Some(8081));

        assert_eq!(harness.handle.stop_all().await.unwrap(), 1);
        settle().await;
        assert_eq!(
            raw_sends(&harness.network, run),
            vec![WireMessage::Text("STOP".to_string())]
        );
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn shutdown_closes_all_connections() {
        let harness = start();
        let (_, a) = open_shell(&harness).await;
        let (_, b) = open_shell(&harness).await;

        harness.handle.shutdown().await.unwrap();
        harness.driver.await.unwrap();

        assert_eq!(harness.network.closed_with(a), Some(CloseCode::NORMAL));
        assert_eq!(harness.network.closed_with(b), Some(CloseCode::NORMAL));
        assert!(matches!(
            harness.handle.input(&b"x"[..]),
            Err(SessionError::DriverStopped)
        ));
    }
}

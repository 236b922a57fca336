use std::time::Duration;

use tracing::{debug, info, trace, warn};
use url::Url;

use super::coalesce::{InputCoalescer, OutputCoalescer};
use super::reconnect::{CloseDecision, ReconnectSupervisor};
use super::surface::{Geometry, RenderSurface, SurfaceFactory};
use super::{Effect, SessionId, SessionKind, SessionParams, SessionStatus, TimerKind};
use crate::config::ClientConfig;
use crate::protocol::port::{PortScanner, PortTracker};
use crate::protocol::{self, ControlFrame, INTERRUPT, WireMessage};
use crate::transport::{CloseCode, CloseFrame, ConnectionId};

const GREEN: &str = "32";
const YELLOW: &str = "33";
const RED: &str = "31";

fn status_line(color: &str, text: &str) -> String {
    format!("\x1b[{color}m[{text}]\x1b[0m")
}

/// The physical connection a session is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    connection: ConnectionId,
    open: bool,
}

/// One logical terminal: its surface, buffers, retry state, and the single
/// connection it is bound to at any moment.
pub struct Session {
    id: SessionId,
    kind: SessionKind,
    params: SessionParams,
    label: String,
    endpoint: Url,
    status: SessionStatus,
    binding: Option<Binding>,
    surface: Box<dyn RenderSurface>,
    supervisor: ReconnectSupervisor,
    input: InputCoalescer,
    output: OutputCoalescer,
    scanner: PortScanner,
    ports: PortTracker,
    batch_window: Duration,
    render_interval: Duration,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        kind: SessionKind,
        params: SessionParams,
        endpoint: Url,
        surface: Box<dyn RenderSurface>,
        config: &ClientConfig,
        ports: PortTracker,
    ) -> Self {
        Self {
            id,
            kind,
            label: format!("{}-{}", kind.label_prefix(), id.0),
            params,
            endpoint,
            status: SessionStatus::Connecting,
            binding: None,
            surface,
            supervisor: ReconnectSupervisor::new(
                config.max_reconnect_attempts,
                config.reconnect_delay,
            ),
            input: InputCoalescer::new(),
            output: OutputCoalescer::new(),
            scanner: PortScanner::new(),
            ports,
            batch_window: config.input_batch_window,
            render_interval: config.render_interval,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// The `sessionId` sent to the server, e.g. `term-3`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.binding.map(|binding| binding.connection)
    }

    pub fn is_connection_open(&self) -> bool {
        self.binding.is_some_and(|binding| binding.open)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.supervisor.attempts()
    }

    pub fn is_failed(&self) -> bool {
        self.supervisor.is_failed()
    }

    pub fn geometry(&self) -> Geometry {
        self.surface.geometry()
    }

    pub fn is_visible(&self) -> bool {
        self.surface.is_visible()
    }

    pub fn input_enabled(&self) -> bool {
        self.surface.input_enabled()
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.surface.set_visible(visible);
    }

    /// Bind to a fresh connection and ask the driver to open it.
    pub(crate) fn connect(&mut self, connection: ConnectionId, effects: &mut Vec<Effect>) {
        self.binding = Some(Binding {
            connection,
            open: false,
        });
        self.status = SessionStatus::Connecting;
        debug!(
            target: "webterm::session",
            session = %self.id,
            connection = %connection,
            url = %self.endpoint,
            "connecting"
        );
        effects.push(Effect::Connect {
            session: self.id,
            connection,
            endpoint: self.endpoint.clone(),
        });
    }

    /// The session can never connect; leave the reason on its surface.
    pub(crate) fn fail_missing_parameter(&mut self, name: &str) {
        warn!(target: "webterm::session", session = %self.id, parameter = name, "missing session parameter");
        self.supervisor.fail();
        self.status = SessionStatus::Closed;
        self.surface.set_input_enabled(false);
        self.surface
            .write_line(&status_line(RED, &format!("cannot open {}: missing {name}", self.kind)));
    }

    pub(crate) fn on_opened(&mut self, effects: &mut Vec<Effect>) {
        let Some(binding) = self.binding.as_mut() else {
            return;
        };
        binding.open = true;
        self.status = SessionStatus::Open;
        self.supervisor.on_open();
        self.surface.set_input_enabled(true);
        info!(target: "webterm::session", session = %self.id, connection = %binding.connection, "connected");

        match self.kind {
            SessionKind::Interactive => {
                self.surface.write_line(&status_line(GREEN, "terminal connected"));
            }
            SessionKind::RunLog => {
                self.surface.write_line(&status_line(GREEN, "run log connected"));
                self.surface.write_line(&status_line(YELLOW, "waiting for logs..."));
            }
        }

        // The server learns the geometry again after every (re)connect.
        self.send_geometry(effects);
    }

    pub(crate) fn on_message(&mut self, message: WireMessage, effects: &mut Vec<Effect>) {
        let bytes = match protocol::decode(message) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(target: "webterm::session", session = %self.id, error = %err, "dropping inbound message");
                return;
            }
        };
        if let Some(port) = self.scanner.scan(&bytes) {
            info!(target: "webterm::session", session = %self.id, port, "port detected");
            self.ports.record(port);
        }
        if self.output.push(&bytes) {
            effects.push(Effect::StartTimer {
                session: self.id,
                timer: TimerKind::RenderTick,
                delay: self.render_interval,
            });
        }
    }

    pub(crate) fn on_render_tick(&mut self) {
        if let Some(bytes) = self.output.flush() {
            self.surface.write(&bytes);
        }
    }

    pub(crate) fn on_input(&mut self, bytes: &[u8], effects: &mut Vec<Effect>) {
        if !self.surface.input_enabled() {
            trace!(target: "webterm::session", session = %self.id, bytes = bytes.len(), "input ignored while disconnected");
            return;
        }
        if self.kind == SessionKind::Interactive {
            self.buffer_input(bytes, effects);
            return;
        }

        let mut segments = bytes.split(|byte| *byte == INTERRUPT);
        if let Some(first) = segments.next() {
            self.buffer_input(first, effects);
        }
        for segment in segments {
            // Everything typed before the interrupt goes out first.
            if let Some(pending) = self.input.drain() {
                self.send(protocol::encode_raw(&pending), effects);
            }
            self.stop(effects);
            self.buffer_input(segment, effects);
        }
    }

    fn buffer_input(&mut self, bytes: &[u8], effects: &mut Vec<Effect>) {
        if self.input.push(bytes) {
            effects.push(Effect::StartTimer {
                session: self.id,
                timer: TimerKind::InputFlush,
                delay: self.batch_window,
            });
        }
    }

    pub(crate) fn on_input_flush(&mut self, effects: &mut Vec<Effect>) {
        if let Some(batch) = self.input.take() {
            self.send(protocol::encode_raw(&batch), effects);
        }
    }

    /// Ask a run-log's process to terminate. Returns whether `STOP` was sent.
    pub(crate) fn stop(&mut self, effects: &mut Vec<Effect>) -> bool {
        if self.kind != SessionKind::RunLog || !self.is_connection_open() {
            return false;
        }
        self.send(protocol::encode_stop(), effects);
        self.surface.write_line(&status_line(YELLOW, "stopping project..."));
        true
    }

    pub(crate) fn on_resize(&mut self, geometry: Geometry, effects: &mut Vec<Effect>) {
        if self.surface.geometry() == geometry {
            return;
        }
        self.surface.resize(geometry);
        self.send_geometry(effects);
    }

    pub(crate) fn clear(&mut self) {
        self.surface.clear();
        self.surface.write_line(&status_line(YELLOW, "terminal cleared"));
    }

    fn send_geometry(&mut self, effects: &mut Vec<Effect>) {
        let Geometry { cols, rows } = self.surface.geometry();
        match protocol::encode_control(&ControlFrame::Resize { cols, rows }) {
            Ok(message) => self.send(message, effects),
            Err(err) => {
                warn!(target: "webterm::session", session = %self.id, error = %err, "failed to encode resize")
            }
        }
    }

    fn send(&mut self, message: WireMessage, effects: &mut Vec<Effect>) {
        match self.binding {
            Some(Binding {
                connection,
                open: true,
            }) => effects.push(Effect::Send {
                connection,
                message,
            }),
            _ => trace!(
                target: "webterm::session",
                session = %self.id,
                bytes = message.len(),
                "send dropped; connection not open"
            ),
        }
    }

    /// The bound connection closed (for any reason other than the user
    /// closing this session).
    pub(crate) fn on_closed(&mut self, frame: &CloseFrame, effects: &mut Vec<Effect>) {
        self.binding = None;
        self.input.discard();
        // The surface is still alive, so what already arrived is shown.
        self.on_render_tick();
        self.surface.set_input_enabled(false);

        match self.supervisor.on_close(frame) {
            CloseDecision::Finished => {
                info!(target: "webterm::session", session = %self.id, code = %frame.code, "connection closed");
                self.status = SessionStatus::Closed;
                self.surface.write_line(&status_line(
                    YELLOW,
                    &format!("connection closed (code {})", frame.code),
                ));
            }
            CloseDecision::Reconnect {
                attempt,
                max,
                delay,
            } => {
                warn!(
                    target: "webterm::session",
                    session = %self.id,
                    code = %frame.code,
                    reason = %frame.reason,
                    attempt,
                    max,
                    "connection lost; scheduling reconnect"
                );
                self.status = SessionStatus::Connecting;
                self.surface.write_line(&status_line(
                    YELLOW,
                    &format!(
                        "connection lost (code {}); reconnecting attempt {attempt}/{max} in {}",
                        frame.code,
                        format_delay(delay)
                    ),
                ));
                effects.push(Effect::StartTimer {
                    session: self.id,
                    timer: TimerKind::Reconnect,
                    delay,
                });
            }
            CloseDecision::Exhausted { attempts } => {
                warn!(target: "webterm::session", session = %self.id, attempts, "giving up on reconnect");
                self.status = SessionStatus::Closed;
                self.surface.write_line(&status_line(
                    RED,
                    &format!("max reconnect attempts reached ({attempts})"),
                ));
            }
        }
    }

    /// Backoff elapsed: swap in a fresh surface and connection. Returns
    /// `false` if the session was not waiting to reconnect.
    pub(crate) fn on_reconnect_due(
        &mut self,
        connection: ConnectionId,
        surfaces: &dyn SurfaceFactory,
        effects: &mut Vec<Effect>,
    ) -> bool {
        let Some(attempt) = self.supervisor.begin_attempt() else {
            return false;
        };
        let geometry = self.surface.geometry();
        let visible = self.surface.is_visible();
        self.surface.dispose();

        let mut surface = surfaces.create(self.id, self.kind, geometry);
        surface.set_visible(visible);
        surface.write_line(&status_line(
            YELLOW,
            &format!(
                "reconnecting (attempt {attempt}/{})",
                self.supervisor.max_attempts()
            ),
        ));
        self.surface = surface;
        self.output.discard();
        self.scanner = PortScanner::new();
        self.connect(connection, effects);
        true
    }

    /// User-initiated close: nothing buffered survives and nothing reconnects.
    pub(crate) fn close(&mut self, effects: &mut Vec<Effect>) {
        self.status = SessionStatus::Closing;
        self.supervisor.fail();
        self.input.discard();
        self.output.discard();
        effects.push(Effect::CancelTimers { session: self.id });
        if let Some(binding) = self.binding.take() {
            effects.push(Effect::Disconnect {
                connection: binding.connection,
                code: CloseCode::NORMAL,
            });
        }
        self.surface.dispose();
        self.status = SessionStatus::Closed;
        debug!(target: "webterm::session", session = %self.id, "closed by user");
    }
}

fn format_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{}ms", delay.as_millis())
    }
}

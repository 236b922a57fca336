use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use super::machine::Session;
use super::surface::{Geometry, SurfaceFactory};
use super::{Effect, SessionError, SessionId, SessionKind, SessionParams, TimerKind};
use crate::config::ClientConfig;
use crate::protocol::port::PortTracker;
use crate::transport::{ConnectionId, EndpointConfig, TransportEvent, TransportEventKind};

/// Every live session plus the focus relation between them.
///
/// The registry is driven from a single task: callers feed it user actions,
/// transport events and timer expiries, then collect the resulting work
/// with [`SessionRegistry::drain_effects`]. Session ids increase
/// monotonically, so iteration order is creation order.
pub struct SessionRegistry {
    config: ClientConfig,
    endpoints: EndpointConfig,
    surfaces: Box<dyn SurfaceFactory>,
    ports: PortTracker,
    sessions: BTreeMap<SessionId, Session>,
    connections: HashMap<ConnectionId, SessionId>,
    focused: Option<SessionId>,
    next_session: u64,
    next_connection: u64,
    geometry: Geometry,
    effects: Vec<Effect>,
}

impl SessionRegistry {
    pub fn init(config: ClientConfig, surfaces: impl SurfaceFactory + 'static) -> Self {
        Self {
            endpoints: EndpointConfig::from_config(&config),
            geometry: config.default_geometry,
            config,
            surfaces: Box::new(surfaces),
            ports: PortTracker::new(),
            sessions: BTreeMap::new(),
            connections: HashMap::new(),
            focused: None,
            next_session: 1,
            next_connection: 1,
            effects: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn port_tracker(&self) -> &PortTracker {
        &self.ports
    }

    pub fn focused(&self) -> Option<SessionId> {
        self.focused
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Session ids in creation order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Geometry given to new sessions.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Take the work queued since the last call.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Create a session and focus it.
    ///
    /// A run log without a project id is still registered (its surface shows
    /// why it never connected) and the error is returned to the caller.
    pub fn open(
        &mut self,
        kind: SessionKind,
        params: SessionParams,
    ) -> Result<SessionId, SessionError> {
        let id = SessionId(self.next_session);
        let label = format!("{}-{}", kind.label_prefix(), id.0);
        let endpoint = self.endpoints.session_url(kind, &label, &params)?;
        self.next_session += 1;

        let missing_project = kind == SessionKind::RunLog && params.project_id().is_none();
        let surface = self.surfaces.create(id, kind, self.geometry);
        let mut session = Session::new(
            id,
            kind,
            params,
            endpoint,
            surface,
            &self.config,
            self.ports.clone(),
        );

        if missing_project {
            session.fail_missing_parameter("projectId");
        } else {
            let connection = self.allocate_connection();
            session.connect(connection, &mut self.effects);
            self.connections.insert(connection, id);
        }
        debug!(target: "webterm::session", session = %id, kind = %kind, "session opened");
        self.sessions.insert(id, session);
        self.activate(id)?;

        if missing_project {
            return Err(SessionError::MissingParameter {
                session: id,
                name: "projectId",
            });
        }
        Ok(id)
    }

    /// Show `id` and hide every other surface.
    pub fn activate(&mut self, id: SessionId) -> Result<(), SessionError> {
        if !self.sessions.contains_key(&id) {
            return Err(SessionError::UnknownSession(id));
        }
        for (session_id, session) in self.sessions.iter_mut() {
            session.set_visible(*session_id == id);
        }
        self.focused = Some(id);
        Ok(())
    }

    /// Focus the session at `index` in creation order.
    pub fn activate_nth(&mut self, index: usize) -> Result<SessionId, SessionError> {
        let id = self
            .sessions
            .keys()
            .nth(index)
            .copied()
            .ok_or(SessionError::UnknownSession(SessionId(index as u64 + 1)))?;
        self.activate(id)?;
        Ok(id)
    }

    /// Move focus to the next (or previous) session, wrapping around.
    pub fn cycle_focus(&mut self, forward: bool) -> Option<SessionId> {
        let ids = self.ids();
        if ids.is_empty() {
            return None;
        }
        let current = self
            .focused
            .and_then(|focused| ids.iter().position(|id| *id == focused))
            .unwrap_or(0);
        let next = if forward {
            (current + 1) % ids.len()
        } else {
            (current + ids.len() - 1) % ids.len()
        };
        let id = ids[next];
        self.activate(id).ok()?;
        Some(id)
    }

    /// Destroy a session with the clean-shutdown code.
    pub fn close(&mut self, id: SessionId) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .remove(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        if let Some(connection) = session.connection() {
            self.connections.remove(&connection);
        }
        session.close(&mut self.effects);

        if self.focused == Some(id) {
            self.focused = None;
            if let Some(next) = self.sessions.keys().next().copied() {
                self.activate(next)?;
            }
        }
        Ok(())
    }

    /// Send `STOP` to every run log with an open connection.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for session in self.sessions.values_mut() {
            if session.stop(&mut self.effects) {
                stopped += 1;
            }
        }
        debug!(target: "webterm::session", stopped, "stop requested for run logs");
        stopped
    }

    pub fn clear_focused(&mut self) {
        if let Some(session) = self.focused.and_then(|id| self.sessions.get_mut(&id)) {
            session.clear();
        }
    }

    /// Keystrokes for the focused session.
    pub fn input(&mut self, bytes: &[u8]) {
        if let Some(id) = self.focused {
            let _ = self.input_to(id, bytes);
        }
    }

    pub fn input_to(&mut self, id: SessionId, bytes: &[u8]) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        session.on_input(bytes, &mut self.effects);
        Ok(())
    }

    pub fn resize(&mut self, id: SessionId, geometry: Geometry) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        session.on_resize(geometry, &mut self.effects);
        Ok(())
    }

    /// The whole display changed size.
    pub fn resize_all(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        for session in self.sessions.values_mut() {
            session.on_resize(geometry, &mut self.effects);
        }
    }

    pub fn handle_transport(&mut self, event: TransportEvent) {
        let Some(id) = self.connections.get(&event.connection).copied() else {
            trace!(target: "webterm::session", connection = %event.connection, "event for retired connection ignored");
            return;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            self.connections.remove(&event.connection);
            return;
        };
        if session.connection() != Some(event.connection) {
            trace!(target: "webterm::session", session = %id, connection = %event.connection, "stale connection event ignored");
            return;
        }

        match event.kind {
            TransportEventKind::Opened => session.on_opened(&mut self.effects),
            TransportEventKind::Message(message) => session.on_message(message, &mut self.effects),
            TransportEventKind::Closed(frame) => {
                self.connections.remove(&event.connection);
                session.on_closed(&frame, &mut self.effects);
            }
        }
    }

    pub fn handle_timer(&mut self, id: SessionId, timer: TimerKind) {
        if !self.sessions.contains_key(&id) {
            trace!(target: "webterm::session", session = %id, ?timer, "timer for closed session ignored");
            return;
        }
        let connection = match timer {
            TimerKind::Reconnect => Some(self.allocate_connection()),
            _ => None,
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        match (timer, connection) {
            (TimerKind::InputFlush, _) => session.on_input_flush(&mut self.effects),
            (TimerKind::RenderTick, _) => session.on_render_tick(),
            (TimerKind::Reconnect, Some(connection)) => {
                if session.on_reconnect_due(connection, self.surfaces.as_ref(), &mut self.effects)
                {
                    self.connections.insert(connection, id);
                }
            }
            (TimerKind::Reconnect, None) => {}
        }
    }

    /// Close every session cleanly; nothing reconnects afterwards.
    pub fn shutdown(&mut self) {
        for id in self.ids() {
            let _ = self.close(id);
        }
        self.focused = None;
    }

    fn allocate_connection(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        id
    }
}

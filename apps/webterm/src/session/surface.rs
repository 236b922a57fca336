use std::sync::Arc;

use parking_lot::Mutex;

use super::{SessionId, SessionKind};

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// Where a session's output is drawn.
///
/// A surface belongs to exactly one session and holds no transport state.
/// It owns the session's geometry.
pub trait RenderSurface: Send {
    /// Write terminal output verbatim.
    fn write(&mut self, bytes: &[u8]);

    /// Write a status line (connectivity changes, diagnostics).
    fn write_line(&mut self, line: &str) {
        self.write(line.as_bytes());
        self.write(b"\r\n");
    }

    fn clear(&mut self);

    fn geometry(&self) -> Geometry;

    fn resize(&mut self, geometry: Geometry);

    fn set_visible(&mut self, visible: bool);

    fn is_visible(&self) -> bool;

    fn set_input_enabled(&mut self, enabled: bool);

    fn input_enabled(&self) -> bool;

    /// Release the surface; nothing is written to it afterwards.
    fn dispose(&mut self);
}

/// Creates a fresh surface for a session (on open and on every reconnect).
pub trait SurfaceFactory: Send {
    fn create(&self, session: SessionId, kind: SessionKind, geometry: Geometry)
    -> Box<dyn RenderSurface>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceState {
    pub output: Vec<u8>,
    pub output_writes: usize,
    pub lines: Vec<String>,
    pub geometry: Geometry,
    pub visible: bool,
    pub input_enabled: bool,
    pub disposed: bool,
    pub clears: usize,
}

/// Surface that records everything in memory.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl MemorySurface {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            state: Arc::new(Mutex::new(SurfaceState {
                output: Vec::new(),
                output_writes: 0,
                lines: Vec::new(),
                geometry,
                visible: false,
                input_enabled: false,
                disposed: false,
                clears: 0,
            })),
        }
    }

    pub fn snapshot(&self) -> SurfaceState {
        self.state.lock().clone()
    }

    /// Everything written so far (output and status lines) as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().output).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.state.lock().lines.clone()
    }

    pub fn output_writes(&self) -> usize {
        self.state.lock().output_writes
    }
}

impl RenderSurface for MemorySurface {
    fn write(&mut self, bytes: &[u8]) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.output.extend_from_slice(bytes);
        state.output_writes += 1;
    }

    fn write_line(&mut self, line: &str) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.output.extend_from_slice(line.as_bytes());
        state.output.extend_from_slice(b"\r\n");
        state.lines.push(line.to_string());
    }

    fn clear(&mut self) {
        let mut state = self.state.lock();
        state.output.clear();
        state.clears += 1;
    }

    fn geometry(&self) -> Geometry {
        self.state.lock().geometry
    }

    fn resize(&mut self, geometry: Geometry) {
        self.state.lock().geometry = geometry;
    }

    fn set_visible(&mut self, visible: bool) {
        self.state.lock().visible = visible;
    }

    fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.state.lock().input_enabled = enabled;
    }

    fn input_enabled(&self) -> bool {
        self.state.lock().input_enabled
    }

    fn dispose(&mut self) {
        let mut state = self.state.lock();
        state.disposed = true;
        state.visible = false;
        state.input_enabled = false;
    }
}

/// Factory handing out [`MemorySurface`]s and remembering each one.
#[derive(Debug, Clone, Default)]
pub struct MemorySurfaceFactory {
    created: Arc<Mutex<Vec<(SessionId, MemorySurface)>>>,
}

impl MemorySurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All surfaces created for `session`, oldest first.
    pub fn surfaces_for(&self, session: SessionId) -> Vec<MemorySurface> {
        self.created
            .lock()
            .iter()
            .filter(|(id, _)| *id == session)
            .map(|(_, surface)| surface.clone())
            .collect()
    }

    /// The surface `session` is currently drawing on.
    pub fn latest(&self, session: SessionId) -> Option<MemorySurface> {
        self.surfaces_for(session).pop()
    }
}

impl SurfaceFactory for MemorySurfaceFactory {
    fn create(
        &self,
        session: SessionId,
        _kind: SessionKind,
        geometry: Geometry,
    ) -> Box<dyn RenderSurface> {
        let surface = MemorySurface::new(geometry);
        self.created.lock().push((session, surface.clone()));
        Box::new(surface)
    }
}

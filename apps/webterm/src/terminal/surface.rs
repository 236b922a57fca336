use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::session::{Geometry, RenderSurface, SessionId, SessionKind, SurfaceFactory};

/// Output kept per session for replay when it regains focus.
const SCROLLBACK_LIMIT: usize = 256 * 1024;

const CLEAR_SCREEN: &[u8] = b"\x1b[2J\x1b[H";

/// Draws a session onto a shared local terminal.
///
/// Only the visible surface writes through to the terminal. Every surface
/// keeps a bounded scrollback so switching focus can redraw what a hidden
/// session printed in the meantime.
pub struct TerminalSurface<W: Write + Send> {
    session: SessionId,
    out: Arc<Mutex<W>>,
    scrollback: Vec<u8>,
    geometry: Geometry,
    visible: bool,
    input_enabled: bool,
    disposed: bool,
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(session: SessionId, out: Arc<Mutex<W>>, geometry: Geometry) -> Self {
        Self {
            session,
            out,
            scrollback: Vec::new(),
            geometry,
            visible: false,
            input_enabled: false,
            disposed: false,
        }
    }

    fn remember(&mut self, bytes: &[u8]) {
        self.scrollback.extend_from_slice(bytes);
        if self.scrollback.len() > SCROLLBACK_LIMIT {
            let excess = self.scrollback.len() - SCROLLBACK_LIMIT;
            self.scrollback.drain(..excess);
        }
    }

    fn emit(&self, chunks: &[&[u8]]) {
        let mut out = self.out.lock();
        for chunk in chunks {
            if let Err(err) = out.write_all(chunk) {
                trace!(target: "webterm::terminal", session = %self.session, error = %err, "terminal write failed");
                return;
            }
        }
        let _ = out.flush();
    }
}

impl<W: Write + Send> RenderSurface for TerminalSurface<W> {
    fn write(&mut self, bytes: &[u8]) {
        if self.disposed {
            return;
        }
        self.remember(bytes);
        if self.visible {
            self.emit(&[bytes]);
        }
    }

    fn clear(&mut self) {
        if self.disposed {
            return;
        }
        self.scrollback.clear();
        if self.visible {
            self.emit(&[CLEAR_SCREEN]);
        }
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn resize(&mut self, geometry: Geometry) {
        self.geometry = geometry;
    }

    fn set_visible(&mut self, visible: bool) {
        if self.disposed || visible == self.visible {
            return;
        }
        self.visible = visible;
        if visible {
            self.emit(&[CLEAR_SCREEN, self.scrollback.as_slice()]);
        }
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.input_enabled = enabled;
    }

    fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.visible = false;
        self.input_enabled = false;
        self.scrollback = Vec::new();
    }
}

/// Hands out [`TerminalSurface`]s that share one writer (normally stdout).
pub struct TerminalSurfaceFactory<W: Write + Send> {
    out: Arc<Mutex<W>>,
}

impl<W: Write + Send> TerminalSurfaceFactory<W> {
    pub fn new(out: Arc<Mutex<W>>) -> Self {
        Self { out }
    }
}

impl<W: Write + Send + 'static> SurfaceFactory for TerminalSurfaceFactory<W> {
    fn create(
        &self,
        session: SessionId,
        _kind: SessionKind,
        geometry: Geometry,
    ) -> Box<dyn RenderSurface> {
        Box::new(TerminalSurface::new(session, self.out.clone(), geometry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> (TerminalSurface<Vec<u8>>, Arc<Mutex<Vec<u8>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let surface = TerminalSurface::new(SessionId(1), out.clone(), Geometry::new(80, 24));
        (surface, out)
    }

    #[test]
    fn hidden_surface_buffers_until_focused() {
        let (mut surface, out) = surface();
        surface.write(b"build ok\r\n");
        assert!(out.lock().is_empty());

        surface.set_visible(true);
        assert_eq!(out.lock().as_slice(), b"\x1b[2J\x1b[Hbuild ok\r\n");

        surface.write(b"$ ");
        assert!(out.lock().ends_with(b"$ "));
    }

    #[test]
    fn scrollback_is_bounded() {
        let (mut surface, _out) = surface();
        let chunk = vec![b'x'; 64 * 1024];
        for _ in 0..8 {
            surface.write(&chunk);
        }
        surface.write(b"tail");
        assert_eq!(surface.scrollback.len(), SCROLLBACK_LIMIT);
        assert!(surface.scrollback.ends_with(b"tail"));
    }

    #[test]
    fn disposed_surface_stays_silent() {
        let (mut surface, out) = surface();
        surface.set_visible(true);
        surface.dispose();
        let before = out.lock().len();
        surface.write(b"late output");
        surface.set_visible(true);
        assert_eq!(out.lock().len(), before);
        assert!(!surface.is_visible());
    }

    #[test]
    fn status_lines_end_with_crlf() {
        let (mut surface, out) = surface();
        surface.set_visible(true);
        surface.write_line("[terminal connected]");
        assert!(out.lock().ends_with(b"[terminal connected]\r\n"));
    }
}

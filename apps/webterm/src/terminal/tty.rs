use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};

use crate::session::Geometry;

/// Puts the local tty into raw mode for as long as it lives.
pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn new(enable: bool) -> Self {
        if enable {
            match enable_raw_mode() {
                Ok(()) => Self(true),
                Err(err) => {
                    tracing::warn!(target: "webterm::terminal", error = %err, "failed to enable raw mode");
                    Self(false)
                }
            }
        } else {
            Self(false)
        }
    }

    pub fn is_active(&self) -> bool {
        self.0
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

/// Current size of the controlling terminal, if there is one.
pub fn terminal_geometry() -> Option<Geometry> {
    match size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => Some(Geometry::new(cols, rows)),
        _ => None,
    }
}

//! Logical terminal sessions.
//!
//! Everything in this module is a plain state machine: it consumes typed
//! events (transport activity, user actions, timer expiries) and queues
//! [`Effect`]s for the driver in [`crate::client`] to carry out. Nothing
//! here touches a socket or a clock, which is what lets the registry tests
//! run without either.

pub mod coalesce;
pub mod machine;
pub mod reconnect;
pub mod registry;
pub mod surface;

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::protocol::WireMessage;
use crate::transport::{CloseCode, ConnectionId};

pub use machine::Session;
pub use registry::SessionRegistry;
pub use surface::{Geometry, RenderSurface, SurfaceFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Free-form PTY shell.
    Interactive,
    /// Output stream of a project's run process.
    RunLog,
}

impl SessionKind {
    pub fn as_query_value(self) -> &'static str {
        match self {
            SessionKind::Interactive => "interactive",
            SessionKind::RunLog => "run",
        }
    }

    pub fn label_prefix(self) -> &'static str {
        match self {
            SessionKind::Interactive => "term",
            SessionKind::RunLog => "run",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query_value())
    }
}

/// Parameters that end up in the session's endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionParams {
    pub project_id: Option<String>,
}

impl SessionParams {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
        }
    }

    pub(crate) fn project_id(&self) -> Option<&str> {
        self.project_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// End of an input batch window.
    InputFlush,
    /// Next rendering tick for buffered output.
    RenderTick,
    /// Backoff before the next reconnect attempt.
    Reconnect,
}

/// Work the driver must perform on behalf of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Connect {
        session: SessionId,
        connection: ConnectionId,
        endpoint: Url,
    },
    Send {
        connection: ConnectionId,
        message: WireMessage,
    },
    Disconnect {
        connection: ConnectionId,
        code: CloseCode,
    },
    StartTimer {
        session: SessionId,
        timer: TimerKind,
        delay: Duration,
    },
    CancelTimers {
        session: SessionId,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("{session} cannot be opened: missing {name}")]
    MissingParameter {
        session: SessionId,
        name: &'static str,
    },
    #[error("invalid session endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("session driver has stopped")]
    DriverStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_project_id_counts_as_missing() {
        assert_eq!(SessionParams::default().project_id(), None);
        assert_eq!(SessionParams::for_project("  ").project_id(), None);
        assert_eq!(SessionParams::for_project("p1").project_id(), Some("p1"));
    }

    #[test]
    fn kinds_map_to_query_values() {
        assert_eq!(SessionKind::Interactive.as_query_value(), "interactive");
        assert_eq!(SessionKind::RunLog.as_query_value(), "run");
        assert_eq!(SessionKind::RunLog.label_prefix(), "run");
    }
}

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{DriverHandle, SessionDriver};
use crate::session::{SessionKind, SessionParams};
use crate::terminal::cli::{Cli, Command};
use crate::terminal::error::CliError;
use crate::terminal::keys::{KeyAction, PrefixKeys};
use crate::terminal::surface::TerminalSurfaceFactory;
use crate::terminal::tty::{RawModeGuard, terminal_geometry};
use crate::transport::websocket::WebSocketConnector;

const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.client_config();
    let project_id = cli.project_id().map(str::to_owned);
    let (kind, params) = match cli.command {
        None | Some(Command::Shell) => (SessionKind::Interactive, SessionParams::default()),
        Some(Command::Run(args)) => {
            if args.project_id.trim().is_empty() {
                return Err(CliError::InvalidArgument(
                    "--project-id must not be empty".into(),
                ));
            }
            (SessionKind::RunLog, SessionParams::for_project(args.project_id))
        }
    };

    info!(target: "webterm::terminal", host = %config.host, tls = config.use_tls(), "starting client");
    let stdout = Arc::new(Mutex::new(io::stdout()));
    let (driver, handle) = SessionDriver::new(
        config,
        WebSocketConnector::new(),
        TerminalSurfaceFactory::new(stdout),
    );
    let driver_task = driver.spawn();

    let raw = RawModeGuard::new(io::stdin().is_terminal());
    debug!(target: "webterm::terminal", raw_mode = raw.is_active(), "local terminal attached");
    let mut geometry = terminal_geometry();
    if let Some(size) = geometry {
        handle.resize_all(size)?;
    }
    handle.open(kind, params).await?;

    let mut input = spawn_stdin_reader();
    let mut keys = PrefixKeys::new();
    let mut resize_poll = tokio::time::interval(RESIZE_POLL_INTERVAL);

    'main: loop {
        tokio::select! {
            chunk = input.recv() => {
                let Some(chunk) = chunk else {
                    debug!(target: "webterm::terminal", "stdin closed");
                    break 'main;
                };
                for action in keys.feed(&chunk) {
                    if !dispatch(&handle, action, project_id.as_deref()).await? {
                        break 'main;
                    }
                }
            }
            _ = resize_poll.tick() => {
                let current = terminal_geometry();
                if current.is_some() && current != geometry {
                    geometry = current;
                    if let Some(size) = current {
                        handle.resize_all(size)?;
                    }
                }
            }
        }
    }

    handle.shutdown().await?;
    let _ = driver_task.await;
    Ok(())
}

/// Apply one key action. Returns `false` when the user asked to quit.
async fn dispatch(
    handle: &DriverHandle,
    action: KeyAction,
    project_id: Option<&str>,
) -> Result<bool, CliError> {
    match action {
        KeyAction::Forward(bytes) => handle.input(bytes)?,
        KeyAction::NewShell => {
            handle
                .open(SessionKind::Interactive, SessionParams::default())
                .await?;
        }
        KeyAction::NewRunLog => {
            let params = SessionParams {
                project_id: project_id.map(str::to_owned),
            };
            // Without a project the session shows why it could not open.
            if let Err(err) = handle.open(SessionKind::RunLog, params).await {
                warn!(target: "webterm::terminal", error = %err, "run log not opened");
            }
        }
        KeyAction::Focus(index) => handle.activate_nth(index)?,
        KeyAction::Next => handle.cycle_focus(true)?,
        KeyAction::Prev => handle.cycle_focus(false)?,
        KeyAction::CloseFocused => handle.close_focused()?,
        KeyAction::StopAll => {
            let stopped = handle.stop_all().await?;
            debug!(target: "webterm::terminal", stopped, "stop sent");
        }
        KeyAction::Clear => handle.clear_focused()?,
        KeyAction::Quit => return Ok(false),
    }
    Ok(true)
}

/// Read raw stdin on a dedicated thread; the channel closes at EOF.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("webterm-stdin".into())
        .spawn(move || {
            let mut stdin = io::stdin();
            let mut buffer = [0u8; 1024];
            loop {
                match stdin.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
    if let Err(err) = spawned {
        warn!(target: "webterm::terminal", error = %err, "failed to start stdin reader");
    }
    rx
}

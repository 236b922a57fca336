use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::config::{ClientConfig, DEFAULT_HOST};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "webterm",
    about = "Attach to the IDE's shell and run-log terminals from a local tty",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "WEBTERM_HOST",
        default_value = DEFAULT_HOST,
        help = "Server address (host:port or ws:// / wss:// base URL)"
    )]
    pub host: String,

    #[arg(
        long,
        global = true,
        env = "WEBTERM_TLS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        value_name = "BOOL",
        help = "Force wss:// (true) or ws:// (false); default picks by host"
    )]
    pub tls: Option<bool>,

    #[arg(
        long = "max-reconnects",
        global = true,
        env = "WEBTERM_MAX_RECONNECTS",
        value_name = "N",
        help = "Reconnect attempts after an abnormal close before giving up"
    )]
    pub max_reconnects: Option<u32>,

    #[arg(
        long = "reconnect-delay-ms",
        global = true,
        env = "WEBTERM_RECONNECT_DELAY_MS",
        value_name = "MS",
        help = "Delay before each reconnect attempt"
    )]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(
        long = "batch-window-ms",
        global = true,
        env = "WEBTERM_BATCH_WINDOW_MS",
        value_name = "MS",
        help = "How long keystrokes are batched before sending"
    )]
    pub batch_window_ms: Option<u64>,

    #[arg(
        long = "render-interval-ms",
        global = true,
        env = "WEBTERM_RENDER_INTERVAL_MS",
        value_name = "MS",
        help = "How long output accumulates before the screen is redrawn"
    )]
    pub render_interval_ms: Option<u64>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "WEBTERM_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "WEBTERM_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open an interactive shell (default when no subcommand given)
    Shell,
    /// Follow a project's run log
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        long = "project-id",
        env = "WEBTERM_PROJECT_ID",
        value_name = "ID",
        help = "Project whose run output to stream"
    )]
    pub project_id: String,
}

impl Cli {
    /// Environment defaults overlaid with anything given on the command line.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env().with_host(&self.host);
        if self.tls.is_some() {
            config.secure = self.tls;
        }
        if let Some(max) = self.max_reconnects {
            let delay = config.reconnect_delay;
            config = config.with_reconnect(max, delay);
        }
        if let Some(ms) = self.reconnect_delay_ms {
            let max = config.max_reconnect_attempts;
            config = config.with_reconnect(max, Duration::from_millis(ms));
        }
        if let Some(ms) = self.batch_window_ms {
            config = config.with_input_batch_window(Duration::from_millis(ms));
        }
        if let Some(ms) = self.render_interval_ms {
            config = config.with_render_interval(Duration::from_millis(ms));
        }
        config
    }

    /// Project id to use for run logs opened from the prefix keys.
    pub fn project_id(&self) -> Option<&str> {
        match &self.command {
            Some(Command::Run(args)) => Some(args.project_id.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_project_id() {
        assert!(Cli::try_parse_from(["webterm", "run"]).is_err());
        let cli = Cli::try_parse_from(["webterm", "run", "--project-id", "p7"]).unwrap();
        assert_eq!(cli.project_id(), Some("p7"));
    }

    #[test]
    fn command_line_overrides_timing() {
        let _lock = crate::config::ENV_MUTEX.lock().unwrap();
        let cli = Cli::try_parse_from([
            "webterm",
            "--host",
            "localhost:9000",
            "--max-reconnects",
            "5",
            "--reconnect-delay-ms",
            "250",
            "--render-interval-ms",
            "40",
            "shell",
        ])
        .unwrap();
        let config = cli.client_config();
        assert_eq!(config.host, "127.0.0.1:9000");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.render_interval, Duration::from_millis(40));
        assert!(matches!(cli.command, Some(Command::Shell)));
    }

    #[test]
    fn tls_flag_without_value_means_true() {
        let _lock = crate::config::ENV_MUTEX.lock().unwrap();
        let cli = Cli::try_parse_from(["webterm", "--tls"]).unwrap();
        assert_eq!(cli.tls, Some(true));
        assert!(cli.client_config().use_tls());
    }
}

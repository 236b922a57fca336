use std::env;
use std::net::IpAddr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::session::surface::Geometry;

pub const DEFAULT_HOST: &str = "127.0.0.1:8080";
pub const DEFAULT_INTERACTIVE_CHANNEL: &str = "ws/terminal";
pub const DEFAULT_RUN_CHANNEL: &str = "ws/run";
pub const DEFAULT_INPUT_BATCH_WINDOW: Duration = Duration::from_millis(5);
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(16);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_GEOMETRY: Geometry = Geometry { cols: 120, rows: 30 };

/// Terminal client configuration.
///
/// The timing values are tunables rather than protocol constants; the
/// server does not depend on any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address, `host[:port]` or a full `ws://`/`wss://` base URL.
    pub host: String,
    /// Use `wss://` instead of `ws://`. `None` picks based on the host.
    pub secure: Option<bool>,
    pub interactive_channel: String,
    pub run_channel: String,
    /// How long keystrokes accumulate before being sent as one message.
    pub input_batch_window: Duration,
    /// Delay between an output chunk arriving and the surface redraw.
    pub render_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub default_geometry: Geometry,
}

impl ClientConfig {
    /// Load configuration from `WEBTERM_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = env::var("WEBTERM_HOST")
            .map(|value| normalize_host(&value))
            .unwrap_or(defaults.host);
        let secure = env::var("WEBTERM_TLS").ok().and_then(|value| parse_bool(&value));

        Self {
            host,
            secure,
            input_batch_window: env_millis("WEBTERM_BATCH_WINDOW_MS")
                .unwrap_or(defaults.input_batch_window),
            render_interval: env_millis("WEBTERM_RENDER_INTERVAL_MS")
                .unwrap_or(defaults.render_interval),
            max_reconnect_attempts: env_parse::<u32>("WEBTERM_MAX_RECONNECTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_delay: env_millis("WEBTERM_RECONNECT_DELAY_MS")
                .unwrap_or(defaults.reconnect_delay),
            ..defaults
        }
    }

    pub fn with_host(mut self, host: impl AsRef<str>) -> Self {
        self.host = normalize_host(host.as_ref());
        self
    }

    pub fn with_input_batch_window(mut self, window: Duration) -> Self {
        self.input_batch_window = window;
        self
    }

    pub fn with_render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval;
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_delay = delay;
        self
    }

    /// Whether endpoints should use `wss://`.
    pub fn use_tls(&self) -> bool {
        if let Some(secure) = self.secure {
            return secure;
        }
        if self.host.starts_with("wss://") {
            return true;
        }
        if self.host.starts_with("ws://") {
            return false;
        }
        !host_name(&self.host).is_some_and(|name| is_loopback(&name))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            secure: None,
            interactive_channel: DEFAULT_INTERACTIVE_CHANNEL.to_string(),
            run_channel: DEFAULT_RUN_CHANNEL.to_string(),
            input_batch_window: DEFAULT_INPUT_BATCH_WINDOW,
            render_interval: DEFAULT_RENDER_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            default_geometry: DEFAULT_GEOMETRY,
        }
    }
}

// Normalize localhost to IPv4 to avoid resolving to ::1 when the server
// only listens on IPv4.
fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if host_name(trimmed).as_deref() == Some("localhost") {
        trimmed.replacen("localhost", "127.0.0.1", 1)
    } else {
        trimmed.to_string()
    }
}

/// Host component of `host[:port]` or a `ws://`/`wss://` base URL.
fn host_name(host: &str) -> Option<String> {
    let parsed = if host.contains("://") {
        Url::parse(host)
    } else {
        Url::parse(&format!("ws://{host}"))
    };
    parsed.ok()?.host_str().map(|name| name.to_ascii_lowercase())
}

fn is_loopback(name: &str) -> bool {
    if name == "localhost" {
        return true;
    }
    name.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = env::var(var).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target: "webterm::config", var, value = %raw, "ignoring invalid value");
            None
        }
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    env_parse::<u64>(var).map(Duration::from_millis)
}

// Environment variables are process-wide; tests that read or write them
// serialize on this.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "WEBTERM_HOST",
        "WEBTERM_TLS",
        "WEBTERM_BATCH_WINDOW_MS",
        "WEBTERM_RENDER_INTERVAL_MS",
        "WEBTERM_MAX_RECONNECTS",
        "WEBTERM_RECONNECT_DELAY_MS",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "127.0.0.1:8080");
        assert_eq!(config.input_batch_window, Duration::from_millis(5));
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.default_geometry, Geometry { cols: 120, rows: 30 });
        assert!(!config.use_tls());
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("WEBTERM_HOST", "localhost:9000");
            env::set_var("WEBTERM_BATCH_WINDOW_MS", "12");
            env::set_var("WEBTERM_MAX_RECONNECTS", "7");
            env::set_var("WEBTERM_RECONNECT_DELAY_MS", "250");
        }
        let config = ClientConfig::from_env();
        clear_env();

        assert_eq!(config.host, "127.0.0.1:9000");
        assert_eq!(config.input_batch_window, Duration::from_millis(12));
        assert_eq!(config.max_reconnect_attempts, 7);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn invalid_env_values_fall_back_to_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("WEBTERM_MAX_RECONNECTS", "lots");
            env::set_var("WEBTERM_TLS", "maybe");
        }
        let config = ClientConfig::from_env();
        clear_env();

        assert_eq!(config.max_reconnect_attempts, DEFAULT_MAX_RECONNECT_ATTEMPTS);
        assert_eq!(config.secure, None);
    }

    #[test]
    fn tls_is_inferred_from_host() {
        let remote = ClientConfig::default().with_host("ide.example.com");
        assert!(remote.use_tls());

        let explicit = ClientConfig::default().with_host("ws://ide.example.com");
        assert!(!explicit.use_tls());

        let mut forced = ClientConfig::default();
        forced.secure = Some(true);
        assert!(forced.use_tls());
    }

    #[test]
    fn only_the_exact_localhost_host_is_rewritten() {
        let local = ClientConfig::default().with_host("ws://localhost:9000/");
        assert_eq!(local.host, "ws://127.0.0.1:9000");

        let lookalike = ClientConfig::default().with_host("localhost.example.com:443");
        assert_eq!(lookalike.host, "localhost.example.com:443");
        assert!(lookalike.use_tls());

        let prefixed = ClientConfig::default().with_host("my-localhost-proxy.dev");
        assert!(prefixed.use_tls());
    }

    #[test]
    fn loopback_addresses_skip_tls() {
        assert!(!ClientConfig::default().with_host("127.0.0.1:8080").use_tls());
        assert!(!ClientConfig::default().with_host("[::1]:8080").use_tls());
        assert!(!ClientConfig::default().with_host("LOCALHOST:8080").use_tls());
        assert!(ClientConfig::default().with_host("10.127.0.1:8080").use_tls());
    }
}

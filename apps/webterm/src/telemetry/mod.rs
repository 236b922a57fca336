use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;

fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

static PERF_ENABLED: Lazy<bool> = Lazy::new(|| env_truthy("WEBTERM_PERF").unwrap_or(false));

static STATS: Lazy<Mutex<HashMap<&'static str, ByteStat>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

const REPORT_EVERY: u64 = 200;

#[derive(Default)]
struct ByteStat {
    count: u64,
    total_bytes: u128,
    max_bytes: usize,
}

pub fn enabled() -> bool {
    *PERF_ENABLED
}

/// Record the size of one batched write (an output flush or an input send).
pub fn record_batch(label: &'static str, bytes: usize) {
    if !enabled() {
        return;
    }
    let mut stats = STATS.lock();
    let entry = stats.entry(label).or_default();
    entry.count += 1;
    entry.total_bytes += bytes as u128;
    entry.max_bytes = entry.max_bytes.max(bytes);
    if entry.count % REPORT_EVERY == 0 {
        report(label, entry);
    }
}

fn report(label: &'static str, stat: &ByteStat) {
    let avg = stat.total_bytes / stat.count.max(1) as u128;
    tracing::info!(
        target: "webterm::perf",
        label,
        batches = stat.count,
        avg_bytes = avg as u64,
        max_bytes = stat.max_bytes,
        "batch stats"
    );
}

pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static INIT: OnceLock<()> = OnceLock::new();
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if INIT.get().is_some() {
            return Ok(());
        }
        inner_init(config)?;
        INIT.set(()).ok();
        Ok(())
    }

    fn inner_init(config: &LogConfig) -> Result<(), InitError> {
        let env_filter = build_env_filter(config.level.to_filter());

        // Terminal output belongs to the sessions, so an interactive run
        // should point logs at a file; stderr is the fallback.
        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(config.level >= LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    fn build_env_filter(level: LevelFilter) -> EnvFilter {
        if let Ok(filter) = std::env::var("WEBTERM_LOG_FILTER") {
            return EnvFilter::new(filter);
        }
        EnvFilter::new(default_filter_for(level, allow_dependency_traces()))
    }

    const NOISY_DEP_TARGETS: &[&str] = &["tokio_tungstenite", "tungstenite", "mio", "native_tls"];

    pub(crate) fn default_filter_for(level: LevelFilter, allow_deps: bool) -> String {
        let mut filter = match level {
            LevelFilter::TRACE => "info,webterm=trace".to_string(),
            LevelFilter::DEBUG => "info,webterm=debug".to_string(),
            LevelFilter::INFO => "info".to_string(),
            LevelFilter::WARN => "warn".to_string(),
            LevelFilter::ERROR => "error".to_string(),
            LevelFilter::OFF => "off".to_string(),
        };
        if level == LevelFilter::TRACE && !allow_deps {
            for target in NOISY_DEP_TARGETS {
                filter.push(',');
                filter.push_str(target);
                filter.push_str("=info");
            }
        }
        filter
    }

    fn allow_dependency_traces() -> bool {
        super::env_truthy("WEBTERM_TRACE_DEPS").unwrap_or(false)
    }

    pub fn hexdump(bytes: &[u8]) -> String {
        const WIDTH: usize = 16;
        let mut out = String::new();
        for (i, chunk) in bytes.chunks(WIDTH).enumerate() {
            use std::fmt::Write as _;
            let _ = write!(out, "{:08x}  ", i * WIDTH);
            for byte in chunk {
                let _ = write!(out, "{byte:02x} ");
            }
            for _ in chunk.len()..WIDTH {
                out.push_str("   ");
            }
            out.push(' ');
            out.extend(chunk.iter().map(|&byte| {
                if (0x20..=0x7e).contains(&byte) {
                    byte as char
                } else {
                    '.'
                }
            }));
            out.push('\n');
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn trace_filter_throttles_dependencies() {
            let filter = default_filter_for(LevelFilter::TRACE, false);
            assert!(filter.starts_with("info,webterm=trace"));
            assert!(filter.contains("tungstenite=info"));

            let unthrottled = default_filter_for(LevelFilter::TRACE, true);
            assert_eq!(unthrottled, "info,webterm=trace");
        }

        #[test]
        fn hexdump_renders_offsets_and_ascii() {
            let dump = hexdump(b"ls\n\x03");
            assert!(dump.starts_with("00000000  6c 73 0a 03 "));
            assert!(dump.trim_end().ends_with("ls.."));
        }
    }
}

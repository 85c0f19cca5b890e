use clap::ValueEnum;
use once_cell::sync::OnceCell;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static GUARD: OnceCell<WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level; with a log file, output is non-blocking and ANSI-free.
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = GUARD.set(guard);
            builder
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|err| LoggingError::Install(err.to_string()))
        }
        None => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| LoggingError::Install(err.to_string())),
    }
}

/// Compact hex rendering of a byte slice for trace-level wire logging.
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

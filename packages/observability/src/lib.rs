//! # Observability
//!
//! Structured logging for the outbox relay processes.
//!
//! Services call [`init_with_config`] once at startup and use `tracing`
//! macros everywhere else. Every event is written as one JSON line to a log
//! file (`~/.outbox-relay/logs/relay.jsonl` by default), which can be
//! followed with `tail -f ... | jq`. A compact stderr layer can be added for
//! foreground runs.
//!
//! `RUST_LOG` takes precedence over the configured default level.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "outbox-relay".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::LogFileWriter;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Included in every log line.
    pub service_name: String,

    /// Default filter (e.g. "info", "outbox_relay=debug"), overridden by `RUST_LOG`.
    pub default_level: String,

    /// Log file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// `~/.outbox-relay/logs/relay.jsonl`
pub fn default_log_path() -> io::Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".outbox-relay").join("logs").join("relay.jsonl"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))
}

/// Install the global subscriber. Returns the log file path.
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_with_config(config: LogConfig) -> io::Result<PathBuf> {
    let log_path = match config.log_path.clone() {
        Some(path) => path,
        None => default_log_path()?,
    };
    let writer = LogFileWriter::open(&log_path)?;

    let json_layer =
        JsonLayer::new(config.service_name.clone(), writer).with_filter(env_filter(&config));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    tracing::info!(
        service = %config.service_name,
        log_path = %log_path.display(),
        "observability initialized"
    );
    Ok(log_path)
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
}

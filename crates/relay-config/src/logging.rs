//! Logging initialization for the relay.
//!
//! Logs go to `<base>/logs/relay.jsonl` as structured JSONL through the
//! `observability` package. `RUST_LOG` overrides the configured level.

use crate::{CoreResult, Paths};
use observability::LogConfig;
use std::path::PathBuf;

/// Install the global subscriber for `service_name`.
///
/// Returns the log file path.
pub fn init_logging(
    service_name: &str,
    level: &str,
    paths: &Paths,
    also_stderr: bool,
) -> CoreResult<PathBuf> {
    let log_path = observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr,
    })?;
    Ok(log_path)
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(tracing::Level::TRACE),
        "debug" => Some(tracing::Level::DEBUG),
        "info" => Some(tracing::Level::INFO),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "error" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

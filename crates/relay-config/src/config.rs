//! Configuration management for the relay.

use crate::{parse_level, CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default Kafka bootstrap servers.
pub const DEFAULT_KAFKA_SERVERS: &str = "localhost:9092";

const ENV_LOG_LEVEL: &str = "OUTBOX_RELAY_LOG_LEVEL";
const ENV_KAFKA_SERVERS: &str = "KAFKA_SERVERS";
const ENV_DATABASE_PATH: &str = "OUTBOX_DATABASE_PATH";

/// Main relay configuration, stored as JSON in `<base>/config.json`.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Outbox database file. Defaults to `Paths::database_file`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    pub kafka: KafkaConfig,
    pub relay: RelayConfig,
    pub breaker: BreakerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database_path: None,
            kafka: KafkaConfig::default(),
            relay: RelayConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Kafka producer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    pub servers: String,
    /// Extra librdkafka properties, applied after the defaults.
    pub properties: BTreeMap<String, String>,
    /// Deadline for one batch to be acknowledged.
    pub max_wait_ms: u64,
    /// How long to wait for queued records on shutdown.
    pub flush_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            servers: DEFAULT_KAFKA_SERVERS.to_string(),
            properties: BTreeMap::new(),
            max_wait_ms: 2_000,
            flush_timeout_ms: 5_000,
        }
    }
}

impl KafkaConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// Relay loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub batch_limit: usize,
    /// Wait after an empty poll.
    pub poll_delay_ms: u64,
    /// Stop the relay when a delivered batch cannot be confirmed.
    pub terminate_on_confirm_failure: bool,
    /// Sleep between attempts while the circuit is open. 0 only yields.
    pub retry_pause_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            poll_delay_ms: 100,
            terminate_on_confirm_failure: false,
            retry_pause_ms: 0,
        }
    }
}

impl RelayConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// The breaker trips once consecutive failures exceed this.
    pub max_consecutive_failures: u32,
    pub open_timeout_ms: u64,
    pub half_open_max_requests: u32,
    /// Closed-state counter reset period. 0 never resets.
    pub interval_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            open_timeout_ms: 10_000,
            half_open_max_requests: 1,
            interval_ms: 10_000,
        }
    }
}

impl BreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load `<base>/config.json` if it exists, then apply environment
    /// overrides and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `<base>/config.json`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// The outbox database file to open.
    pub fn database_file(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        // Filter directives such as "outbox_relay=debug" are passed through.
        if parse_level(&self.log_level).is_none() && !self.log_level.contains('=') {
            return Err(CoreError::Config(format!(
                "unknown log_level {:?}",
                self.log_level
            )));
        }
        if self.kafka.servers.trim().is_empty() {
            return Err(CoreError::Config(
                "kafka.servers must not be empty".to_string(),
            ));
        }
        if self.kafka.max_wait_ms == 0 {
            return Err(CoreError::Config(
                "kafka.max_wait_ms must be greater than zero".to_string(),
            ));
        }
        if self.relay.batch_limit == 0 {
            return Err(CoreError::Config(
                "relay.batch_limit must be greater than zero".to_string(),
            ));
        }
        if self.breaker.open_timeout_ms == 0 {
            return Err(CoreError::Config(
                "breaker.open_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, ignoring empty values.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(level) = value(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(servers) = value(ENV_KAFKA_SERVERS) {
            self.kafka.servers = servers;
        }
        if let Some(path) = value(ENV_DATABASE_PATH) {
            self.database_path = Some(PathBuf::from(path));
        }
    }
}

//! File system paths for the relay.

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

const BASE_DIR_NAME: &str = ".outbox-relay";

/// Manages file system paths for the relay.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.outbox-relay)
    base_dir: PathBuf,
}

impl Paths {
    /// Paths under `~/.outbox-relay`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base>/config.json`
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// `<base>/outbox.sqlite`, unless the configuration names another file.
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("outbox.sqlite")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// `<base>/logs/relay.jsonl`
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("relay.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

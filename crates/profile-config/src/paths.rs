//! File system locations used by the CLI.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths under the base directory (`~/.profile-sync`).
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Use `~/.profile-sync` as the base directory.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".profile-sync"),
        })
    }

    /// Use a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// `config.json` under the base directory.
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Cached session artifacts, purged on sign-out.
    pub fn session_file(&self) -> PathBuf {
        self.base_dir.join("session.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// JSONL log file written by the observability layer.
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("dev.jsonl")
    }

    /// Ensure the base and log directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

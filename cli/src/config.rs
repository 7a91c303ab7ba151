//! Controller configuration.
//!
//! Defaults live in `~/.ftl/config.yaml`; CLI flags override per run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scheduler::DEFAULT_CHUNK_SIZE;
use crate::transport::DEFAULT_INTERPRETER;

/// Top-level configuration stored in `~/.ftl/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Hosts executed in parallel per chunk. Must be at least 1.
    pub chunk_size: usize,
    /// Stop scheduling new work after the first failure.
    pub fail_fast: bool,
    /// Check mode: report what would change without changing it.
    pub dry_run: bool,
    /// Remote interpreter that launches the agent archive.
    pub interpreter: String,
    /// Directories searched for external module collections.
    pub module_roots: Vec<PathBuf>,
    /// External modules bundled into the agent archive.
    pub module_bundle: Vec<String>,
    /// Agent archive cache; defaults to `~/.ftl/cache`.
    pub cache_dir: Option<PathBuf>,
    /// Probe agent capabilities after each handshake.
    pub probe: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fail_fast: false,
            dry_run: false,
            interpreter: DEFAULT_INTERPRETER.to_string(),
            module_roots: Vec::new(),
            module_bundle: Vec::new(),
            cache_dir: None,
            probe: false,
        }
    }
}

impl ControllerConfig {
    /// Load the config file, falling back to defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Self::load_from(&home.join(".ftl").join("config.yaml"))
    }

    /// Load from an explicit path (used in tests).
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        anyhow::ensure!(config.chunk_size >= 1, "chunk_size must be at least 1");
        Ok(config)
    }

    /// Effective cache directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no explicit cache dir is set and the home
    /// directory cannot be determined.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".ftl").join("cache"))
    }
}

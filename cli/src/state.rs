//! Cross-run state persistence.
//!
//! A versioned JSON document at `~/.ftl/state.json` recording what the
//! controller knows between runs: per-host run history and a free-form
//! resource map for modules that track managed resources. Writes are
//! atomic (temp file + rename) so a crash can never leave a torn document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::summary::RunSummary;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the controller remembers about one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub address: String,
    pub last_run: DateTime<Utc>,
    pub last_module: String,
    pub last_failed: bool,
    pub last_changed: bool,
}

/// The persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerState {
    pub metadata: StateMetadata,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostRecord>,
    #[serde(default)]
    pub resources: BTreeMap<String, Value>,
}

impl ControllerState {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            metadata: StateMetadata {
                version: STATE_VERSION,
                created_at: now,
                updated_at: now,
            },
            hosts: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    /// Fold one run's outcome into the host map.
    pub fn record_run(&mut self, module: &str, summary: &RunSummary) {
        for (host, result) in &summary.results {
            let record = HostRecord {
                address: self
                    .hosts
                    .get(host)
                    .map_or_else(|| host.clone(), |r| r.address.clone()),
                last_run: result.started_at,
                last_module: module.to_string(),
                last_failed: result.failed,
                last_changed: result.changed,
            };
            self.hosts.insert(host.clone(), record);
        }
        self.metadata.updated_at = Utc::now();
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

/// State file manager with async load/save over `spawn_blocking`.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store at the default path (`~/.ftl/state.json`).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_path(home.join(".ftl").join("state.json")))
    }

    /// Store at an explicit path (used in tests).
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Synchronous load, used internally by `load` via `spawn_blocking`.
    fn load_sync(&self) -> Result<Option<ControllerState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading state file {}", self.path.display()))?;
        let state: ControllerState = serde_json::from_str(&content)
            .with_context(|| format!("parsing state file {}", self.path.display()))?;
        anyhow::ensure!(
            state.metadata.version <= STATE_VERSION,
            "state file version {} is newer than this controller understands",
            state.metadata.version
        );
        Ok(Some(state))
    }

    /// Synchronous save, used internally by `save` via `spawn_blocking`.
    fn save_sync(&self, state: &ControllerState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(state).context("serializing state")?;

        // Atomic write via temp file then rename.
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
        }

        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("finalizing state file {}", self.path.display()))?;

        Ok(())
    }

    /// Load the persisted state, `None` when no file exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<Option<ControllerState>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || StateStore::with_path(path).load_sync())
            .await
            .context("state load task panicked")?
    }

    /// Persist `state` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or renamed.
    pub async fn save(&self, state: &ControllerState) -> Result<()> {
        let path = self.path.clone();
        let state = state.clone();
        tokio::task::spawn_blocking(move || StateStore::with_path(path).save_sync(&state))
            .await
            .context("state save task panicked")?
    }
}

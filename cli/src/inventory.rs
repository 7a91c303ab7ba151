//! Target host model and the YAML inventory file.
//!
//! The inventory maps host names to connection details. A host whose name or
//! address is in the loopback set runs modules locally, without a transport.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Names and addresses that mean "this machine".
const LOOPBACK: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

pub const DEFAULT_SSH_PORT: u16 = 22;

/// One addressable target. Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Unique inventory name.
    pub name: String,
    /// Network address; defaults to the name when the inventory omits it.
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key path handed to the transport; `None` uses agent/defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Free-form per-host variables, exposed to native modules.
    #[serde(default)]
    pub vars: Map<String, Value>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

impl Host {
    /// Create a host whose address equals its name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            address: name.clone(),
            name,
            port: DEFAULT_SSH_PORT,
            user: default_user(),
            key_file: None,
            vars: Map::new(),
        }
    }

    /// Create a host with an explicit address.
    #[must_use]
    pub fn with_address(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut host = Self::named(name);
        host.address = address.into();
        host
    }

    /// `true` when modules for this host run inside the controller process
    /// instead of over a transport.
    #[must_use]
    pub fn is_local(&self) -> bool {
        LOOPBACK.contains(&self.name.as_str()) || LOOPBACK.contains(&self.address.as_str())
    }
}

/// Per-host entry as written in the inventory file. The host name is the
/// map key, so it is not repeated in the entry body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HostEntry {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    key_file: Option<PathBuf>,
    #[serde(default)]
    vars: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    hosts: BTreeMap<String, HostEntry>,
}

/// The loaded inventory, in file order (BTreeMap: name order).
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: Vec<Host>,
}

impl Inventory {
    /// Load an inventory from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading inventory {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing inventory {}", path.display()))
    }

    /// Parse inventory YAML.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed YAML.
    pub fn parse(content: &str) -> Result<Self> {
        let file: InventoryFile = serde_yaml::from_str(content).context("invalid YAML")?;
        let hosts = file
            .hosts
            .into_iter()
            .map(|(name, entry)| Host {
                address: entry.address.unwrap_or_else(|| name.clone()),
                port: entry.port.unwrap_or(DEFAULT_SSH_PORT),
                user: entry.user.unwrap_or_else(default_user),
                key_file: entry.key_file,
                vars: entry.vars,
                name,
            })
            .collect();
        Ok(Self { hosts })
    }

    #[must_use]
    pub fn from_hosts(hosts: Vec<Host>) -> Self {
        Self { hosts }
    }

    #[must_use]
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Select targets: `all`, or a comma-separated list of host names.
    ///
    /// # Errors
    ///
    /// Returns an error when a named host is not in the inventory.
    pub fn select(&self, expression: &str) -> Result<Vec<Host>> {
        let expression = expression.trim();
        if expression.is_empty() || expression == "all" {
            return Ok(self.hosts.clone());
        }
        let mut selected = Vec::new();
        for name in expression.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let host = self
                .hosts
                .iter()
                .find(|h| h.name == name)
                .ok_or_else(|| anyhow::anyhow!("host '{name}' is not in the inventory"))?;
            selected.push(host.clone());
        }
        anyhow::ensure!(!selected.is_empty(), "target expression selected no hosts");
        Ok(selected)
    }
}

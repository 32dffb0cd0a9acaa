//! Client-side remote configuration.
//!
//! Read from `$DEPOT_CONFIG`, falling back to `~/.config/depot/config.yml`.
//! A missing file yields a single `local` remote.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use depot_core::error::{DepotError, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "DEPOT_CONFIG";

/// Name of the remote every config carries.
pub const LOCAL_REMOTE: &str = "local";

/// Address of the `local` remote when none is configured.
pub const DEFAULT_LOCAL_ADDR: &str = "http://127.0.0.1:8443";

/// A daemon the CLI can talk to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Remote {
    /// Base URL, e.g. `https://10.0.0.2:8443`
    pub addr: String,

    /// Bearer token presented to the daemon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemotesConfig {
    pub default_remote: String,
    pub remotes: HashMap<String, Remote>,
}

impl Default for RemotesConfig {
    fn default() -> Self {
        let mut remotes = HashMap::new();
        remotes.insert(LOCAL_REMOTE.to_string(), local_remote());
        Self {
            default_remote: LOCAL_REMOTE.to_string(),
            remotes,
        }
    }
}

fn local_remote() -> Remote {
    Remote {
        addr: DEFAULT_LOCAL_ADDR.to_string(),
        token: None,
    }
}

impl RemotesConfig {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depot")
            .join("config.yml")
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path).map_err(|e| {
            DepotError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config: Self = serde_yaml::from_str(&data).map_err(|e| {
            DepotError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;

        config
            .remotes
            .entry(LOCAL_REMOTE.to_string())
            .or_insert_with(local_remote);
        if config.default_remote.is_empty() {
            config.default_remote = LOCAL_REMOTE.to_string();
        }
        Ok(config)
    }

    /// Split `[remote:]name` into its remote and container parts.
    ///
    /// A bare name belongs to the default remote.
    pub fn parse_remote_and_container(&self, raw: &str) -> (String, String) {
        match raw.split_once(':') {
            Some((remote, name)) => (remote.to_string(), name.to_string()),
            None => (self.default_remote.clone(), raw.to_string()),
        }
    }

    /// Look up a remote by name.
    pub fn remote(&self, name: &str) -> Result<&Remote> {
        self.remotes
            .get(name)
            .ok_or_else(|| DepotError::NotFound(format!("remote {}", name)))
    }
}

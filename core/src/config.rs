//! Daemon configuration.
//!
//! Loaded from a YAML file; every field has a default so a missing file
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DepotError, Result};
use crate::log::LogFormat;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// State directory. Images live in `<var_dir>/images`.
    pub var_dir: PathBuf,

    /// Addresses the HTTP API binds to
    pub listen: Vec<String>,

    /// Addresses advertised to peers for migration (defaults to `listen`)
    pub addresses: Vec<String>,

    /// Storage backend selection
    pub storage: StorageConfig,

    /// Bearer tokens whose holders are trusted clients
    pub trusted_tokens: Vec<String>,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            var_dir: PathBuf::from("/var/lib/depot"),
            listen: vec!["127.0.0.1:8443".to_string()],
            addresses: Vec::new(),
            storage: StorageConfig::default(),
            trusted_tokens: Vec::new(),
            log_format: LogFormat::Text,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a YAML file.
    ///
    /// A missing file is not an error: defaults are returned.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No daemon config file, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path).map_err(|e| {
            DepotError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&data)
            .map_err(|e| DepotError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Directory holding image content files and sidecars.
    pub fn images_dir(&self) -> PathBuf {
        self.var_dir.join("images")
    }

    /// Path of the metadata database.
    pub fn database_path(&self) -> PathBuf {
        self.var_dir.join("depot.db")
    }

    /// Directory of container root directories (`<name>/`).
    pub fn containers_dir(&self) -> PathBuf {
        self.var_dir.join("containers")
    }

    /// Directory of snapshot root directories (`<name>/<snapshot>/`).
    pub fn snapshots_dir(&self) -> PathBuf {
        self.var_dir.join("snapshots")
    }

    /// Addresses a peer should dial to reach this daemon.
    pub fn advertised_addresses(&self) -> Vec<String> {
        if self.addresses.is_empty() {
            self.listen.clone()
        } else {
            self.addresses.clone()
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind
    pub backend: StorageBackendKind,

    /// LVM volume group holding image volumes
    pub lvm_vg_name: Option<String>,

    /// Thin pool name; created on first use when unset
    pub lvm_thinpool_name: Option<String>,

    /// Virtual size of each image thin volume (lvcreate syntax, e.g. "10G")
    pub lvm_volume_size: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Auto,
            lvm_vg_name: None,
            lvm_thinpool_name: None,
            lvm_volume_size: "10G".to_string(),
        }
    }
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// LVM when a volume group is configured, btrfs when the images
    /// directory is on btrfs, plain directory otherwise.
    Auto,
    Dir,
    Btrfs,
    Lvm,
}

impl std::fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Dir => write!(f, "dir"),
            Self::Btrfs => write!(f, "btrfs"),
            Self::Lvm => write!(f, "lvm"),
        }
    }
}

impl std::str::FromStr for StorageBackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "dir" => Ok(Self::Dir),
            "btrfs" => Ok(Self::Btrfs),
            "lvm" => Ok(Self::Lvm),
            _ => Err(format!(
                "unknown storage backend: '{}' (supported: auto, dir, btrfs, lvm)",
                s
            )),
        }
    }
}

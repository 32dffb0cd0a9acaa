//! Container naming and copy/migration request documents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Config key holding the fingerprint of the image a container came from.
pub const BASE_IMAGE_KEY: &str = "volatile.base_image";

/// Separator between a container name and a snapshot name.
pub const SNAPSHOT_DELIMITER: char = '/';

/// Whether `name` refers to a snapshot (`container/snapshot`).
pub fn is_snapshot(name: &str) -> bool {
    name.contains(SNAPSHOT_DELIMITER)
}

/// Split `container/snapshot` into its parts.
pub fn split_snapshot(name: &str) -> Option<(&str, &str)> {
    name.split_once(SNAPSHOT_DELIMITER)
}

/// Whether a config key holds runtime-assigned state.
pub fn is_volatile_key(key: &str) -> bool {
    key.starts_with("volatile")
}

/// Container state as reported by `GET /containers/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerState {
    pub name: String,
    pub config: HashMap<String, String>,
    pub profiles: Vec<String>,
}

impl ContainerState {
    /// Fingerprint of the image the container was built from.
    pub fn base_image(&self) -> String {
        self.config.get(BASE_IMAGE_KEY).cloned().unwrap_or_default()
    }
}

/// Source section of a container creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSource {
    /// `copy` or `migration`
    #[serde(rename = "type")]
    pub source_type: String,

    /// Migration mode (`pull`)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mode: String,

    /// Websocket URL of the source operation
    #[serde(skip_serializing_if = "String::is_empty")]
    pub operation: String,

    /// Channel name to token
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub secrets: HashMap<String, String>,

    #[serde(rename = "base-image", skip_serializing_if = "String::is_empty")]
    pub base_image: String,

    /// Source container for a local copy
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// Body of `POST /containers`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerCreateRequest {
    pub name: String,
    pub config: HashMap<String, String>,
    pub profiles: Vec<String>,
    pub source: ContainerSource,
}

impl ContainerCreateRequest {
    /// Local clone of `source` into `name`.
    pub fn local_copy(
        name: &str,
        source: &str,
        config: HashMap<String, String>,
        profiles: Vec<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            config,
            profiles,
            source: ContainerSource {
                source_type: "copy".to_string(),
                source: source.to_string(),
                ..Default::default()
            },
        }
    }

    /// Pull migration from a source daemon's websocket operation.
    pub fn migration(
        name: &str,
        operation_url: &str,
        secrets: HashMap<String, String>,
        config: HashMap<String, String>,
        profiles: Vec<String>,
        base_image: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            config,
            profiles,
            source: ContainerSource {
                source_type: "migration".to_string(),
                mode: "pull".to_string(),
                operation: operation_url.to_string(),
                secrets,
                base_image: base_image.to_string(),
                source: String::new(),
            },
        }
    }
}

/// Body of `POST /containers/{name}` asking for a migration source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSourceRequest {
    pub migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_names() {
        assert!(is_snapshot("c1/snap0"));
        assert!(!is_snapshot("c1"));
        assert_eq!(split_snapshot("c1/snap0"), Some(("c1", "snap0")));
        assert_eq!(split_snapshot("c1"), None);
    }

    #[test]
    fn test_volatile_keys() {
        assert!(is_volatile_key("volatile.eth0.hwaddr"));
        assert!(is_volatile_key("volatile"));
        assert!(!is_volatile_key("limits.cpu"));
    }

    #[test]
    fn test_base_image() {
        let mut state = ContainerState::default();
        assert_eq!(state.base_image(), "");
        state
            .config
            .insert(BASE_IMAGE_KEY.to_string(), "abc".to_string());
        assert_eq!(state.base_image(), "abc");
    }

    #[test]
    fn test_migration_request_shape() {
        let mut secrets = HashMap::new();
        secrets.insert("control".to_string(), "t1".to_string());
        let req = ContainerCreateRequest::migration(
            "c2",
            "wss://10.0.0.2:8443/1.0/operations/x/websocket",
            secrets,
            HashMap::new(),
            vec!["default".to_string()],
            "fp",
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["source"]["type"], "migration");
        assert_eq!(value["source"]["mode"], "pull");
        assert_eq!(value["source"]["base-image"], "fp");
        assert_eq!(value["source"]["secrets"]["control"], "t1");
        assert!(value["source"].get("source").is_none());
    }
}

//! Image, alias and image-metadata documents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Architecture names and their stored ids.
const ARCHITECTURES: &[(&str, i64)] = &[
    ("i686", 1),
    ("x86_64", 2),
    ("armv7l", 3),
    ("aarch64", 4),
    ("ppc", 5),
    ("ppc64", 6),
    ("ppc64le", 7),
];

/// Map an architecture name to its id. Unknown names map to 0.
pub fn architecture_id(name: &str) -> i64 {
    ARCHITECTURES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
        .unwrap_or(0)
}

/// Map an architecture id back to its name.
pub fn architecture_name(id: i64) -> &'static str {
    ARCHITECTURES
        .iter()
        .find(|(_, i)| *i == id)
        .map(|(n, _)| *n)
        .unwrap_or("unknown")
}

/// Architecture of the running host, in the naming used by image metadata.
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i686",
        "arm" => "armv7l",
        "powerpc" => "ppc",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}

/// Whether `s` is a full lower-case hex SHA-256 digest.
pub fn is_valid_fingerprint(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// API URL of an image record.
pub fn image_url(fingerprint: &str) -> String {
    format!("/{}/images/{}", crate::API_VERSION, fingerprint)
}

/// API URL of an alias record.
pub fn alias_url(name: &str) -> String {
    format!("/{}/images/aliases/{}", crate::API_VERSION, name)
}

/// Image record as returned by `GET /images/{fp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub fingerprint: String,
    pub filename: String,
    pub properties: HashMap<String, String>,
    pub aliases: Vec<ImageAlias>,
    pub public: bool,
    pub size: i64,
    pub architecture: String,
    pub creation_date: i64,
    pub expiry_date: i64,
    pub upload_date: i64,
}

/// Alias as embedded in an image record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAlias {
    pub name: String,
    pub description: String,
}

/// Alias record as returned by `GET /images/aliases/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasInfo {
    pub name: String,
    pub target: String,
    pub description: String,
}

/// Template entry of `metadata.yaml`. Opaque here; consumed by the
/// container runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateEntry {
    pub when: Vec<String>,
    pub template: String,
    pub properties: HashMap<String, String>,
}

/// `metadata.yaml` document embedded in image tarballs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMetadata {
    pub architecture: String,
    pub creation_date: i64,
    pub expiry_date: i64,
    pub properties: HashMap<String, String>,
    pub templates: HashMap<String, TemplateEntry>,
}

/// Source of a container-built image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub name: String,
}

/// JSON body of `POST /images` building an image from a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePostRequest {
    pub filename: String,
    pub public: bool,
    pub source: ImageSource,
    pub properties: HashMap<String, String>,
}

/// Body of `PUT /images/{fp}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePutRequest {
    pub properties: HashMap<String, String>,
}

/// Body of `POST /images/aliases`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasPostRequest {
    pub name: String,
    pub description: String,
    pub target: String,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    pub fingerprint: String,
    pub size: i64,
}

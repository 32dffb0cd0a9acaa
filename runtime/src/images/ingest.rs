//! Image ingestion pipeline.
//!
//! upload -> hash -> fingerprint check -> duplicate check -> metadata ->
//! promote -> storage sidecar -> metadata store.

use depot_core::error::{DepotError, Result};
use depot_core::image::{architecture_id, ImageMetadata, ImagePostRequest, IngestResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::upload::{hash_file, BuildDir, ImageUpload, UploadDigest};
use crate::archive::{self, rootfs_sidecar};
use crate::compression;
use crate::container::{validate_source, ContainerExporter};
use crate::db::{Database, NewImage};
use crate::storage::StorageBackend;

/// JSON build requests larger than this are treated as tarballs.
const MAX_JSON_REQUEST: u64 = 1024 * 1024;

/// Request-level options of an ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// `X-LXD-public`
    pub public: bool,
    /// `X-LXD-filename`
    pub filename: String,
    /// `X-LXD-fingerprint`
    pub expected_fingerprint: Option<String>,
    /// Raw `X-LXD-properties` header values, in order
    pub property_headers: Vec<String>,
}

/// Fingerprints currently being ingested.
#[derive(Default)]
pub struct FingerprintClaims {
    active: Mutex<HashSet<String>>,
}

/// Held while a fingerprint is being ingested.
pub struct FingerprintClaim {
    claims: Arc<FingerprintClaims>,
    fingerprint: String,
}

impl FingerprintClaims {
    /// Claim `fingerprint`. A concurrent ingestion of the same bytes is a
    /// conflict.
    pub fn claim(self: &Arc<Self>, fingerprint: &str) -> Result<FingerprintClaim> {
        if !self.active.lock().insert(fingerprint.to_string()) {
            return Err(DepotError::Conflict(format!(
                "Image {} is already being imported",
                fingerprint
            )));
        }
        Ok(FingerprintClaim {
            claims: Arc::clone(self),
            fingerprint: fingerprint.to_string(),
        })
    }
}

impl Drop for FingerprintClaim {
    fn drop(&mut self) {
        self.claims.active.lock().remove(&self.fingerprint);
    }
}

/// Files moved into the images directory; removed on drop unless kept.
struct PromotedFiles {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl PromotedFiles {
    fn new() -> Self {
        Self {
            paths: Vec::new(),
            keep: false,
        }
    }

    fn promote(&mut self, from: &Path, to: PathBuf) -> Result<()> {
        std::fs::rename(from, &to).map_err(|e| {
            DepotError::Internal(format!(
                "Failed to move {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })?;
        self.paths.push(to);
        Ok(())
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PromotedFiles {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove promoted image file");
            }
        }
    }
}

/// Parse `X-LXD-properties` values. Duplicate keys keep the last value.
pub fn parse_property_headers(values: &[String]) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    for value in values {
        for (key, val) in url::form_urlencoded::parse(value.as_bytes()) {
            properties.insert(key.into_owned(), val.into_owned());
        }
    }
    properties
}

/// Read `path` as a container build request, if it is one.
fn read_build_request(path: &Path) -> Option<ImagePostRequest> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() == 0 || meta.len() > MAX_JSON_REQUEST {
        return None;
    }
    let mut data = Vec::new();
    std::fs::File::open(path).ok()?.read_to_end(&mut data).ok()?;
    if data.iter().find(|b| !b.is_ascii_whitespace()) != Some(&b'{') {
        return None;
    }
    serde_json::from_slice(&data).ok()
}

/// Image ingestion pipeline.
#[derive(Clone)]
pub struct ImageIngest {
    images_dir: PathBuf,
    db: Arc<Database>,
    backend: Arc<dyn StorageBackend>,
    exporter: Arc<dyn ContainerExporter>,
    claims: Arc<FingerprintClaims>,
}

impl ImageIngest {
    pub fn new(
        images_dir: PathBuf,
        db: Arc<Database>,
        backend: Arc<dyn StorageBackend>,
        exporter: Arc<dyn ContainerExporter>,
    ) -> Self {
        Self {
            images_dir,
            db,
            backend,
            exporter,
            claims: Arc::new(FingerprintClaims::default()),
        }
    }

    /// Start an upload in a fresh build directory.
    pub fn begin(&self) -> Result<ImageUpload> {
        let build = BuildDir::new(&self.images_dir, self.backend.clone())?;
        Ok(ImageUpload::new(build))
    }

    /// Turn a staged upload into a stored image.
    pub async fn ingest(&self, upload: ImageUpload, options: IngestOptions) -> Result<IngestResult> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.ingest_blocking(upload, options))
            .await
            .map_err(|e| DepotError::Internal(format!("Image ingestion task failed: {}", e)))?
    }

    fn ingest_blocking(&self, upload: ImageUpload, options: IngestOptions) -> Result<IngestResult> {
        let ImageUpload {
            build,
            digest,
            tarball,
            rootfs,
        } = upload;
        let result = self.ingest_staged(&build, digest, tarball, rootfs, &options);
        build.close();
        result
    }

    fn ingest_staged(
        &self,
        build: &BuildDir,
        digest: UploadDigest,
        tarball: Option<PathBuf>,
        rootfs: Option<PathBuf>,
        options: &IngestOptions,
    ) -> Result<IngestResult> {
        let tarball =
            tarball.ok_or_else(|| DepotError::BadRequest("No image data received".into()))?;

        // A small JSON body asks for an image built from a container.
        let request = if rootfs.is_none() {
            read_build_request(&tarball)
        } else {
            None
        };

        let (tarball, fingerprint, size, filename, public, json_properties) = match request {
            Some(request) => {
                validate_source(&request.source)?;
                let exported = self.exporter.export(&request.source, build.path())?;
                let (fingerprint, size) = hash_file(&exported)?;
                (
                    exported,
                    fingerprint,
                    size,
                    request.filename,
                    request.public,
                    Some(request.properties),
                )
            }
            None => {
                let size = digest.size();
                (
                    tarball,
                    digest.finish(),
                    size,
                    options.filename.clone(),
                    options.public,
                    None,
                )
            }
        };
        let from_container = json_properties.is_some();

        if let Some(expected) = &options.expected_fingerprint {
            if *expected != fingerprint {
                return Err(DepotError::HashMismatch {
                    expected: expected.clone(),
                    actual: fingerprint,
                });
            }
        }

        let _claim = self.claims.claim(&fingerprint)?;
        if self.db.image_exists(&fingerprint)? {
            return Err(DepotError::Conflict(format!(
                "Image with same fingerprint already exists: {}",
                fingerprint
            )));
        }

        let metadata = match archive::read_image_metadata(&tarball) {
            Ok(metadata) => metadata,
            Err(e) if from_container && !matches!(e, DepotError::UnsupportedCompression(_)) => {
                tracing::debug!(fingerprint = %fingerprint, error = %e, "Container export has no metadata");
                ImageMetadata::default()
            }
            Err(e) => return Err(e),
        };
        if let Some(rootfs) = &rootfs {
            compression::detect(rootfs)?;
        }

        let mut properties = metadata.properties.clone();
        properties.extend(parse_property_headers(&options.property_headers));
        if let Some(json_properties) = json_properties {
            properties.extend(json_properties);
        }

        let content = self.images_dir.join(&fingerprint);
        let mut promoted = PromotedFiles::new();
        promoted.promote(&tarball, content.clone())?;
        if let Some(rootfs) = &rootfs {
            promoted.promote(rootfs, rootfs_sidecar(&content))?;
        }

        self.build_sidecar(build.path(), &fingerprint, &content)?;

        let image = NewImage {
            fingerprint: fingerprint.clone(),
            filename,
            size: size as i64,
            public,
            architecture: architecture_id(&metadata.architecture),
            creation_date: metadata.creation_date,
            expiry_date: metadata.expiry_date,
        };
        if let Err(e) = self.db.insert_image(&image, &properties) {
            let cleanup = self
                .backend
                .delete_image_store(&self.images_dir, &fingerprint)
                .err()
                .map(|c| vec![c.to_string()])
                .unwrap_or_default();
            return Err(e.with_cleanup(cleanup));
        }

        promoted.keep();
        tracing::info!(
            fingerprint = %fingerprint,
            size,
            backend = %self.backend.kind(),
            "Image imported"
        );
        Ok(IngestResult {
            fingerprint,
            size: size as i64,
        })
    }

    /// Build the backend sidecar; a partial sidecar is torn down on failure.
    fn build_sidecar(&self, build_dir: &Path, fingerprint: &str, content: &Path) -> Result<()> {
        let mut workspace = self.backend.prepare_image_store(build_dir, fingerprint)?;

        let result = self
            .backend
            .unpack_into(&mut workspace, content)
            .and_then(|_| self.backend.finalize(&mut workspace, &self.images_dir));

        result.map_err(|e| {
            let cleanup = self
                .backend
                .discard(&mut workspace)
                .err()
                .map(|c| vec![c.to_string()])
                .unwrap_or_default();
            e.with_cleanup(cleanup)
        })
    }
}

//! Image lookup, export, deletion and export secrets.

use depot_core::error::{DepotError, Result};
use depot_core::image::{image_url, ImageInfo};
use depot_core::operation::{Operation, OperationClass, OperationRegistry};
use rand::RngCore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::rootfs_sidecar;
use crate::compression;
use crate::db::{Database, ImageRecord};
use crate::storage::StorageBackend;

/// Random bytes in an export secret.
const SECRET_LEN: usize = 32;

/// One downloadable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub path: PathBuf,
    pub filename: String,
}

/// What `GET /images/{fp}/export` sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageExport {
    Single(ExportFile),
    /// Split image: `metadata` and `rootfs` parts.
    Split {
        metadata: ExportFile,
        rootfs: ExportFile,
    },
}

/// Who is asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct Access<'a> {
    pub trusted: bool,
    /// `?secret=` presented by an untrusted caller
    pub secret: Option<&'a str>,
}

impl<'a> Access<'a> {
    pub fn trusted() -> Self {
        Self {
            trusted: true,
            secret: None,
        }
    }

    pub fn untrusted(secret: Option<&'a str>) -> Self {
        Self {
            trusted: false,
            secret,
        }
    }
}

/// Read, export and delete stored images.
#[derive(Clone)]
pub struct ImageService {
    images_dir: PathBuf,
    db: Arc<Database>,
    backend: Arc<dyn StorageBackend>,
    operations: Arc<OperationRegistry>,
}

impl ImageService {
    pub fn new(
        images_dir: PathBuf,
        db: Arc<Database>,
        backend: Arc<dyn StorageBackend>,
        operations: Arc<OperationRegistry>,
    ) -> Self {
        Self {
            images_dir,
            db,
            backend,
            operations,
        }
    }

    /// Whether `access` may see private image `fingerprint`.
    fn sees_private(&self, fingerprint: &str, access: Access<'_>) -> bool {
        access.trusted
            || access
                .secret
                .is_some_and(|s| self.operations.image_secret_valid(fingerprint, s))
    }

    /// Image URLs visible to the caller.
    pub fn list_urls(&self, trusted: bool) -> Result<Vec<String>> {
        Ok(self
            .db
            .list_images(!trusted)?
            .iter()
            .map(|fp| image_url(fp))
            .collect())
    }

    /// Full records of every image visible to the caller.
    pub fn list_records(&self, trusted: bool) -> Result<Vec<ImageInfo>> {
        self.db
            .list_images(!trusted)?
            .iter()
            .map(|fp| {
                let record = self.db.get_image(fp, !trusted)?;
                self.db.image_info(&record)
            })
            .collect()
    }

    fn record(&self, fingerprint: &str, access: Access<'_>) -> Result<ImageRecord> {
        let public_only = !self.sees_private(fingerprint, access);
        self.db.get_image(fingerprint, public_only)
    }

    pub fn get(&self, fingerprint: &str, access: Access<'_>) -> Result<ImageInfo> {
        let record = self.record(fingerprint, access)?;
        self.db.image_info(&record)
    }

    /// Files to send for an export.
    pub fn export(&self, fingerprint: &str, access: Access<'_>) -> Result<ImageExport> {
        let record = self.record(fingerprint, access)?;
        let content = self.images_dir.join(&record.fingerprint);
        if !content.exists() {
            return Err(DepotError::NotFound(format!(
                "image file {}",
                content.display()
            )));
        }

        let filename = if record.filename.is_empty() {
            default_filename(&content, &record.fingerprint)
        } else {
            record.filename.clone()
        };

        let rootfs = rootfs_sidecar(&content);
        if rootfs.exists() {
            return Ok(ImageExport::Split {
                metadata: ExportFile {
                    path: content,
                    filename: format!("meta-{}", filename),
                },
                rootfs: ExportFile {
                    path: rootfs,
                    filename,
                },
            });
        }

        Ok(ImageExport::Single(ExportFile {
            path: content,
            filename,
        }))
    }

    /// Mint an export secret for `fingerprint`.
    ///
    /// The secret stays valid while the returned operation is running;
    /// cancelling the operation revokes it.
    pub fn create_secret(&self, fingerprint: &str) -> Result<Operation> {
        let record = self.db.get_image(fingerprint, false)?;

        let mut bytes = [0u8; SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let secret = hex::encode(bytes);

        let mut resources = HashMap::new();
        resources.insert("images".to_string(), vec![image_url(&record.fingerprint)]);
        let op = self.operations.create(
            OperationClass::Token,
            resources,
            serde_json::json!({ "secret": secret }),
        );

        tracing::info!(fingerprint = %record.fingerprint, operation = %op.id, "Created image secret");
        Ok(op)
    }

    /// Delete an image: sidecars, content files, then the database rows.
    pub fn delete(&self, fingerprint: &str) -> Result<()> {
        let record = self.db.get_image(fingerprint, false)?;

        self.backend
            .delete_image_store(&self.images_dir, &record.fingerprint)?;

        let content = self.images_dir.join(&record.fingerprint);
        remove_if_exists(&content)?;
        remove_if_exists(&rootfs_sidecar(&content))?;

        self.db.delete_image(record.id)?;
        tracing::info!(fingerprint = %record.fingerprint, "Image deleted");
        Ok(())
    }

    /// Replace the property set of an image.
    pub fn update_properties(
        &self,
        fingerprint: &str,
        properties: &HashMap<String, String>,
    ) -> Result<()> {
        let record = self.db.get_image(fingerprint, false)?;
        self.db.replace_properties(record.id, properties)?;
        tracing::debug!(fingerprint = %record.fingerprint, count = properties.len(), "Replaced image properties");
        Ok(())
    }
}

/// `<fingerprint><extension>`, or empty if the format cannot be detected.
fn default_filename(content: &Path, fingerprint: &str) -> String {
    match compression::detect(content) {
        Ok(compression) => format!("{}{}", fingerprint, compression.extension()),
        Err(e) => {
            tracing::debug!(fingerprint = %fingerprint, error = %e, "No export filename");
            String::new()
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DepotError::Internal(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

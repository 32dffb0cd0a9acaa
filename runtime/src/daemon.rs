//! Daemon state shared by request handlers.

use depot_core::config::{DaemonConfig, StorageBackendKind};
use depot_core::error::{DepotError, Result};
use depot_core::operation::OperationRegistry;
use std::path::Path;
use std::sync::Arc;

use crate::container::{ContainerExporter, DirContainerExporter};
use crate::db::Database;
use crate::images::{AliasService, ImageIngest, ImageService, BUILD_DIR_PREFIX};
use crate::storage::{self, CommandRunner, StorageBackend, SystemRunner};

/// Everything a request handler needs: configuration, metadata store,
/// storage backend, operation registry and the image services built on
/// top of them.
pub struct Daemon {
    config: DaemonConfig,
    db: Arc<Database>,
    backend: Arc<dyn StorageBackend>,
    operations: Arc<OperationRegistry>,
    ingest: ImageIngest,
    images: ImageService,
    aliases: AliasService,
    backing_fs: String,
}

impl Daemon {
    /// Open the state directory described by `config`.
    pub fn init(config: DaemonConfig) -> Result<Self> {
        let exporter = Arc::new(DirContainerExporter::new(
            config.containers_dir(),
            config.snapshots_dir(),
        ));
        Self::with_collaborators(config, Arc::new(SystemRunner), exporter)
    }

    /// Like [`init`](Self::init) with explicit storage command runner and
    /// container exporter.
    pub fn with_collaborators(
        config: DaemonConfig,
        runner: Arc<dyn CommandRunner>,
        exporter: Arc<dyn ContainerExporter>,
    ) -> Result<Self> {
        let images_dir = config.images_dir();
        for dir in [&images_dir, &config.containers_dir(), &config.snapshots_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| {
                DepotError::Internal(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let db = Arc::new(Database::open(&config.database_path())?);
        let backend = storage::select(&config.storage, &images_dir, db.clone(), runner)?;
        sweep_build_dirs(&images_dir, backend.as_ref());

        let operations = OperationRegistry::new();
        let ingest = ImageIngest::new(images_dir.clone(), db.clone(), backend.clone(), exporter);
        let images = ImageService::new(
            images_dir.clone(),
            db.clone(),
            backend.clone(),
            operations.clone(),
        );
        let aliases = AliasService::new(db.clone());
        let backing_fs = storage::filesystem_name(&images_dir);

        tracing::info!(
            var_dir = %config.var_dir.display(),
            backend = %backend.kind(),
            backing_fs = %backing_fs,
            "Daemon state initialised"
        );

        Ok(Self {
            config,
            db,
            backend,
            operations,
            ingest,
            images,
            aliases,
            backing_fs,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn operations(&self) -> &Arc<OperationRegistry> {
        &self.operations
    }

    pub fn ingest(&self) -> &ImageIngest {
        &self.ingest
    }

    pub fn images(&self) -> &ImageService {
        &self.images
    }

    pub fn aliases(&self) -> &AliasService {
        &self.aliases
    }

    pub fn backend_kind(&self) -> StorageBackendKind {
        self.backend.kind()
    }

    /// Filesystem the images directory lives on.
    pub fn backing_fs(&self) -> &str {
        &self.backing_fs
    }
}

/// Remove build directories left behind by a previous run.
fn sweep_build_dirs(images_dir: &Path, backend: &dyn StorageBackend) {
    let entries = match std::fs::read_dir(images_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %images_dir.display(), error = %e, "Failed to scan images directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_build_dir = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(BUILD_DIR_PREFIX))
            && path.is_dir();
        if !is_build_dir {
            continue;
        }

        for error in backend.cleanup_build_dir(&path) {
            tracing::warn!(path = %path.display(), error = %error, "Stale build directory cleanup failed");
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "Removed stale build directory"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale build directory")
            }
        }
    }
}

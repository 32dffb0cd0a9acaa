//! btrfs backend: each image gets a subvolume holding its unpacked tree.

use depot_core::config::StorageBackendKind;
use depot_core::error::{DepotError, Result};
use std::path::Path;
use std::sync::Arc;

use super::{cleanup_build_entries, remove_sidecars, remove_subvolume_tree, sidecar_path};
use super::{CommandRunner, StorageBackend, Workspace, WorkspaceKind};

pub struct BtrfsBackend {
    runner: Arc<dyn CommandRunner>,
}

impl BtrfsBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl StorageBackend for BtrfsBackend {
    fn kind(&self) -> StorageBackendKind {
        StorageBackendKind::Btrfs
    }

    fn prepare_image_store(&self, build_dir: &Path, fingerprint: &str) -> Result<Workspace> {
        let path = sidecar_path(build_dir, fingerprint, ".btrfs");
        let subvolume = path.to_string_lossy();
        self.runner
            .run("btrfs", &["subvolume", "create", subvolume.as_ref()])?;

        tracing::debug!(fingerprint, path = %path.display(), "Created image subvolume");
        Ok(Workspace {
            fingerprint: fingerprint.to_string(),
            kind: WorkspaceKind::Subvolume { path },
        })
    }

    fn finalize(&self, workspace: &mut Workspace, images_dir: &Path) -> Result<()> {
        let WorkspaceKind::Subvolume { path } = &workspace.kind else {
            return Err(DepotError::Internal("workspace is not a subvolume".into()));
        };

        let target = sidecar_path(images_dir, &workspace.fingerprint, ".btrfs");
        std::fs::rename(path, &target).map_err(|e| {
            DepotError::StorageBackend(format!(
                "failed to move subvolume {} to {}: {}",
                path.display(),
                target.display(),
                e
            ))
        })?;
        workspace.kind = WorkspaceKind::Subvolume { path: target };
        Ok(())
    }

    fn discard(&self, workspace: &mut Workspace) -> Result<()> {
        let WorkspaceKind::Subvolume { path } = &workspace.kind else {
            return Ok(());
        };
        remove_subvolume_tree(self.runner.as_ref(), path, true)
    }

    fn delete_image_store(&self, images_dir: &Path, fingerprint: &str) -> Result<()> {
        remove_sidecars(self.runner.as_ref(), images_dir, fingerprint)
    }

    fn cleanup_build_dir(&self, build_dir: &Path) -> Vec<String> {
        cleanup_build_entries(self.runner.as_ref(), build_dir)
    }
}

//! Plain directory backend: the tarball is the only artifact.

use depot_core::config::StorageBackendKind;
use depot_core::error::Result;
use std::path::Path;
use std::sync::Arc;

use super::{cleanup_build_entries, plain_workspace, remove_sidecars};
use super::{CommandRunner, StorageBackend, Workspace};

pub struct DirBackend {
    runner: Arc<dyn CommandRunner>,
}

impl DirBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl StorageBackend for DirBackend {
    fn kind(&self) -> StorageBackendKind {
        StorageBackendKind::Dir
    }

    fn prepare_image_store(&self, _build_dir: &Path, fingerprint: &str) -> Result<Workspace> {
        Ok(plain_workspace(fingerprint))
    }

    fn finalize(&self, _workspace: &mut Workspace, _images_dir: &Path) -> Result<()> {
        Ok(())
    }

    fn discard(&self, _workspace: &mut Workspace) -> Result<()> {
        Ok(())
    }

    // Sidecars left over from a previous backend selection are still removed.
    fn delete_image_store(&self, images_dir: &Path, fingerprint: &str) -> Result<()> {
        remove_sidecars(self.runner.as_ref(), images_dir, fingerprint)
    }

    fn cleanup_build_dir(&self, build_dir: &Path) -> Vec<String> {
        cleanup_build_entries(self.runner.as_ref(), build_dir)
    }
}

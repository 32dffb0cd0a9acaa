//! Storage backends for unpacked image sidecars.
//!
//! Every image keeps its content file at `<images>/<fp>`. Backends may add
//! one unpacked sidecar next to it:
//!
//! - `dir`: none
//! - `btrfs`: `<fp>.btrfs`, a subvolume holding the unpacked tree
//! - `lvm`: `<fp>.lv`, a symlink to a thin LV with an ext4 filesystem
//!
//! Sidecars are built inside the per-upload build directory and moved
//! into the images directory by [`StorageBackend::finalize`].

mod btrfs;
mod command;
mod dir;
mod lvm;

pub use btrfs::BtrfsBackend;
pub use command::{CommandRunner, SystemRunner};
pub use dir::DirBackend;
pub use lvm::{LvmBackend, SettingStore, THINPOOL_SETTING};

#[cfg(test)]
pub(crate) use command::testing::RecordingRunner;

use depot_core::config::{StorageBackendKind, StorageConfig};
use depot_core::error::{DepotError, Result};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive;

/// `statfs` magic of btrfs.
pub const BTRFS_SUPER_MAGIC: i64 = 0x9123_683e;

/// Inode number of every btrfs subvolume root.
const BTRFS_SUBVOLUME_INODE: u64 = 256;

/// In-progress sidecar for one fingerprint.
#[derive(Debug)]
pub struct Workspace {
    fingerprint: String,
    kind: WorkspaceKind,
}

#[derive(Debug)]
enum WorkspaceKind {
    Dir,
    Subvolume {
        path: PathBuf,
    },
    ThinVolume {
        /// `<build>/<fp>.lv` symlink to the device
        link: PathBuf,
        /// `vg/lv`
        volume: String,
        mount_point: PathBuf,
        mounted: bool,
    },
}

impl Workspace {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Directory the image tree is unpacked into, if the backend keeps one.
    pub fn unpack_target(&self) -> Option<&Path> {
        match &self.kind {
            WorkspaceKind::Dir => None,
            WorkspaceKind::Subvolume { path } => Some(path.as_path()),
            WorkspaceKind::ThinVolume { mount_point, .. } => Some(mount_point.as_path()),
        }
    }
}

/// Storage backend contract used by image ingestion.
///
/// A workspace that was not finalized must be passed to
/// [`discard`](Self::discard).
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageBackendKind;

    /// Allocate the sidecar for `fingerprint` inside `build_dir`.
    fn prepare_image_store(&self, build_dir: &Path, fingerprint: &str) -> Result<Workspace>;

    /// Unpack the image archive (and its `.rootfs` sidecar) into the workspace.
    fn unpack_into(&self, workspace: &mut Workspace, archive_path: &Path) -> Result<()> {
        match workspace.unpack_target() {
            Some(target) => archive::untar_image(archive_path, target),
            None => Ok(()),
        }
    }

    /// Move the finished sidecar into `images_dir`.
    fn finalize(&self, workspace: &mut Workspace, images_dir: &Path) -> Result<()>;

    /// Tear down an unfinished workspace.
    fn discard(&self, workspace: &mut Workspace) -> Result<()>;

    /// Remove whatever sidecar exists for `fingerprint` in `images_dir`.
    fn delete_image_store(&self, images_dir: &Path, fingerprint: &str) -> Result<()>;

    /// Release storage objects left in a build directory before it is
    /// removed. Returns the errors encountered.
    fn cleanup_build_dir(&self, build_dir: &Path) -> Vec<String>;
}

/// Build the unpack-free workspace used by the directory backend.
fn plain_workspace(fingerprint: &str) -> Workspace {
    Workspace {
        fingerprint: fingerprint.to_string(),
        kind: WorkspaceKind::Dir,
    }
}

/// Path of a sidecar next to the content file.
pub fn sidecar_path(dir: &Path, fingerprint: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{}{}", fingerprint, suffix))
}

/// Pick the backend for the images directory.
pub fn select(
    config: &StorageConfig,
    images_dir: &Path,
    settings: Arc<dyn SettingStore>,
    runner: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn StorageBackend>> {
    let kind = match config.backend {
        StorageBackendKind::Auto if config.lvm_vg_name.is_some() => StorageBackendKind::Lvm,
        StorageBackendKind::Auto => {
            if filesystem_magic(images_dir).ok() == Some(BTRFS_SUPER_MAGIC) {
                StorageBackendKind::Btrfs
            } else {
                StorageBackendKind::Dir
            }
        }
        other => other,
    };

    let backend: Arc<dyn StorageBackend> = match kind {
        StorageBackendKind::Lvm => {
            let vg = config.lvm_vg_name.clone().ok_or_else(|| {
                DepotError::Config("storage.lvm_vg_name is required for the lvm backend".into())
            })?;
            Arc::new(LvmBackend::new(
                vg,
                config.lvm_thinpool_name.clone(),
                config.lvm_volume_size.clone(),
                settings,
                runner,
            ))
        }
        StorageBackendKind::Btrfs => Arc::new(BtrfsBackend::new(runner)),
        StorageBackendKind::Dir | StorageBackendKind::Auto => Arc::new(DirBackend::new(runner)),
    };

    tracing::info!(backend = %backend.kind(), images = %images_dir.display(), "Selected storage backend");
    Ok(backend)
}

/// `statfs` filesystem type of `path`.
pub fn filesystem_magic(path: &Path) -> Result<i64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| DepotError::Internal(format!("invalid path {}: {}", path.display(), e)))?;
    // SAFETY: statfs only writes into the zeroed struct we own.
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(stat.f_type as i64)
}

/// Human-readable filesystem name of `path`.
pub fn filesystem_name(path: &Path) -> String {
    match filesystem_magic(path) {
        Ok(BTRFS_SUPER_MAGIC) => "btrfs",
        Ok(0xef53) => "ext4",
        Ok(0x5846_5342) => "xfs",
        Ok(0x0102_1994) => "tmpfs",
        Ok(0x2fc1_2fc1) => "zfs",
        Ok(0x6969) => "nfs",
        Ok(0x794c_7630) => "overlayfs",
        _ => "unknown",
    }
    .to_string()
}

/// Whether `path` is the root of a btrfs subvolume.
pub fn is_subvolume(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() && meta.ino() == BTRFS_SUBVOLUME_INODE => {
            filesystem_magic(path).ok() == Some(BTRFS_SUPER_MAGIC)
        }
        _ => false,
    }
}

/// Subvolumes at or below `root`, deepest first.
pub fn nested_subvolumes(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
        if is_subvolume(dir) {
            found.push(dir.to_path_buf());
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                walk(&entry.path(), found);
            }
        }
    }

    let mut found = Vec::new();
    walk(root, &mut found);
    found.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    found
}

/// Delete the tree at `path`. Nested subvolumes are deleted deepest first,
/// then `path` itself when it is a subvolume.
pub(crate) fn remove_subvolume_tree(
    runner: &dyn CommandRunner,
    path: &Path,
    root_is_subvolume: bool,
) -> Result<()> {
    let mut subvolumes: Vec<PathBuf> = nested_subvolumes(path)
        .into_iter()
        .filter(|p| p != path)
        .collect();
    if root_is_subvolume || is_subvolume(path) {
        subvolumes.push(path.to_path_buf());
    }

    for subvolume in &subvolumes {
        let subvolume = subvolume.to_string_lossy();
        runner.run("btrfs", &["subvolume", "delete", subvolume.as_ref()])?;
    }

    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| {
            DepotError::StorageBackend(format!("failed to remove {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// Remove the thin LV behind a `*.lv` symlink, then the symlink.
pub(crate) fn remove_lv_link(runner: &dyn CommandRunner, link: &Path) -> Result<()> {
    let device = std::fs::read_link(link).map_err(|e| {
        DepotError::StorageBackend(format!("failed to read {}: {}", link.display(), e))
    })?;
    let device = device.to_string_lossy();
    runner.run("lvremove", &["-f", device.as_ref()])?;
    std::fs::remove_file(link)?;
    Ok(())
}

/// Remove any `.btrfs` or `.lv` sidecar of `fingerprint`, whichever exists.
pub(crate) fn remove_sidecars(
    runner: &dyn CommandRunner,
    images_dir: &Path,
    fingerprint: &str,
) -> Result<()> {
    let subvolume = sidecar_path(images_dir, fingerprint, ".btrfs");
    if subvolume.exists() {
        remove_subvolume_tree(runner, &subvolume, false)?;
    }

    let link = sidecar_path(images_dir, fingerprint, ".lv");
    if std::fs::symlink_metadata(&link).is_ok() {
        remove_lv_link(runner, &link)?;
    }
    Ok(())
}

/// Shared build-directory cleanup.
///
/// Mount points are released first so that no LV is removed while its
/// filesystem is still mounted. LVs behind `*.lv` links and subvolumes are
/// removed afterwards; LVs are left alone if any unmount failed.
pub(crate) fn cleanup_build_entries(runner: &dyn CommandRunner, build_dir: &Path) -> Vec<String> {
    let mut errors = Vec::new();
    let Ok(entries) = std::fs::read_dir(build_dir) else {
        return errors;
    };

    let mut mount_points = Vec::new();
    let mut links = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_symlink() && name.ends_with(".lv") {
            links.push(entry.path());
        } else if file_type.is_dir() && name.starts_with(lvm::MOUNT_PREFIX) {
            mount_points.push(entry.path());
        } else if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }

    let mut unmounted = true;
    for path in &mount_points {
        if !is_mounted(path) {
            continue;
        }
        let mount_point = path.to_string_lossy();
        match runner.run("umount", &[mount_point.as_ref()]) {
            Ok(_) => remove_mount_dir(path),
            Err(e) => {
                unmounted = false;
                errors.push(e.to_string());
            }
        }
    }

    for link in &links {
        if !unmounted {
            errors.push(format!(
                "left {} in place: a mount point could not be released",
                link.display()
            ));
            continue;
        }
        if let Err(e) = remove_lv_link(runner, link) {
            errors.push(e.to_string());
        }
    }

    for dir in &dirs {
        if nested_subvolumes(dir).is_empty() {
            continue;
        }
        if let Err(e) = remove_subvolume_tree(runner, dir, false) {
            errors.push(e.to_string());
        }
    }
    errors
}

/// Remove an emptied mount point directory.
pub(crate) fn remove_mount_dir(path: &Path) {
    if let Err(e) = std::fs::remove_dir(path) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove mount point");
    }
}

/// Whether a temporary mount point still holds a filesystem.
///
/// Mount points are created empty, so any entry below one means a volume
/// is mounted there.
fn is_mounted(path: &Path) -> bool {
    is_mount_point(path)
        || std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
}

/// Whether `path` is on a different device than its parent.
fn is_mount_point(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    match (std::fs::metadata(path), std::fs::metadata(parent)) {
        (Ok(a), Ok(b)) => a.dev() != b.dev(),
        _ => false,
    }
}

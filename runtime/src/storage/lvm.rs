//! LVM backend: each image gets a thin LV with an ext4 filesystem holding
//! its unpacked tree, referenced by a `<fp>.lv` symlink.

use depot_core::config::StorageBackendKind;
use depot_core::error::{DepotError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    cleanup_build_entries, remove_lv_link, remove_mount_dir, remove_sidecars, sidecar_path,
};
use super::{CommandRunner, StorageBackend, Workspace, WorkspaceKind};

/// Setting key holding the thin pool created on first use.
pub const THINPOOL_SETTING: &str = "storage.lvm_thinpool_name";

/// Name of the thin pool created when none is configured.
pub const DEFAULT_THINPOOL: &str = "DepotPool";

/// Prefix of temporary mount points inside build directories.
pub(crate) const MOUNT_PREFIX: &str = "tmp_lv_mnt";

/// Persistent server-wide settings.
pub trait SettingStore: Send + Sync {
    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

pub struct LvmBackend {
    vg_name: String,
    configured_pool: Option<String>,
    volume_size: String,
    settings: Arc<dyn SettingStore>,
    runner: Arc<dyn CommandRunner>,
}

impl LvmBackend {
    pub fn new(
        vg_name: String,
        configured_pool: Option<String>,
        volume_size: String,
        settings: Arc<dyn SettingStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            vg_name,
            configured_pool,
            volume_size,
            settings,
            runner,
        }
    }

    /// Thin pool to allocate from, creating and persisting one on first use.
    ///
    /// A pool recorded in the settings store wins over the configured one.
    pub fn ensure_thin_pool(&self) -> Result<String> {
        if let Some(pool) = self.settings.get_setting(THINPOOL_SETTING)? {
            if !pool.is_empty() {
                return Ok(pool);
            }
        }
        if let Some(pool) = &self.configured_pool {
            return Ok(pool.clone());
        }

        let target = format!("{}/{}", self.vg_name, DEFAULT_THINPOOL);
        self.runner.run(
            "lvcreate",
            &[
                "--poolmetadatasize",
                "1G",
                "-l",
                "100%FREE",
                "--thinpool",
                &target,
            ],
        )?;
        self.settings.set_setting(THINPOOL_SETTING, DEFAULT_THINPOOL)?;

        tracing::info!(vg = %self.vg_name, pool = DEFAULT_THINPOOL, "Created thin pool");
        Ok(DEFAULT_THINPOOL.to_string())
    }

    fn device_path(&self, lv_name: &str) -> PathBuf {
        PathBuf::from(format!("/dev/{}/{}", self.vg_name, lv_name))
    }

    fn create_volume(&self, fingerprint: &str) -> Result<(String, PathBuf)> {
        let pool = self.ensure_thin_pool()?;
        let pool_path = format!("{}/{}", self.vg_name, pool);
        self.runner.run(
            "lvcreate",
            &[
                "--thin",
                "-n",
                fingerprint,
                "--virtualsize",
                &self.volume_size,
                &pool_path,
            ],
        )?;
        Ok((
            format!("{}/{}", self.vg_name, fingerprint),
            self.device_path(fingerprint),
        ))
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let target = mount_point.to_string_lossy();
        self.runner.run("umount", &[target.as_ref()])?;
        Ok(())
    }

    /// Remove the LV and its link. Not attempted while the LV is mounted.
    fn teardown(&self, workspace: &mut Workspace) -> Result<()> {
        let WorkspaceKind::ThinVolume {
            link,
            volume,
            mount_point,
            mounted,
        } = &mut workspace.kind
        else {
            return Ok(());
        };

        if *mounted {
            self.unmount(mount_point)?;
            *mounted = false;
        }
        remove_mount_dir(mount_point);

        if std::fs::symlink_metadata(&*link).is_ok() {
            remove_lv_link(self.runner.as_ref(), link)
        } else {
            self.runner.run("lvremove", &["-f", volume.as_str()]).map(|_| ())
        }
    }
}

impl StorageBackend for LvmBackend {
    fn kind(&self) -> StorageBackendKind {
        StorageBackendKind::Lvm
    }

    fn prepare_image_store(&self, build_dir: &Path, fingerprint: &str) -> Result<Workspace> {
        let mount_point = tempfile::Builder::new()
            .prefix(MOUNT_PREFIX)
            .tempdir_in(build_dir)
            .map_err(|e| {
                DepotError::StorageBackend(format!("failed to create mount point: {}", e))
            })?
            .into_path();
        let (volume, device) = self.create_volume(fingerprint)?;
        let link = sidecar_path(build_dir, fingerprint, ".lv");

        let mut workspace = Workspace {
            fingerprint: fingerprint.to_string(),
            kind: WorkspaceKind::ThinVolume {
                link: link.clone(),
                volume,
                mount_point: mount_point.clone(),
                mounted: false,
            },
        };

        let device_arg = device.to_string_lossy().into_owned();
        let mount_arg = mount_point.to_string_lossy().into_owned();
        let setup = std::os::unix::fs::symlink(&device, &link)
            .map_err(|e| {
                DepotError::StorageBackend(format!(
                    "failed to link {} to {}: {}",
                    link.display(),
                    device.display(),
                    e
                ))
            })
            .and_then(|_| {
                self.runner.run(
                    "mkfs.ext4",
                    &[
                        "-E",
                        "nodiscard,lazy_itable_init=0,lazy_journal_init=0",
                        &device_arg,
                    ],
                )
            })
            .and_then(|_| {
                self.runner
                    .run("mount", &["-o", "discard", &device_arg, &mount_arg])
            });

        match setup {
            Ok(_) => {
                if let WorkspaceKind::ThinVolume { mounted, .. } = &mut workspace.kind {
                    *mounted = true;
                }
                tracing::debug!(fingerprint, device = %device.display(), "Prepared thin volume");
                Ok(workspace)
            }
            Err(e) => {
                let cleanup = self
                    .teardown(&mut workspace)
                    .err()
                    .map(|c| vec![c.to_string()])
                    .unwrap_or_default();
                Err(e.with_cleanup(cleanup))
            }
        }
    }

    fn finalize(&self, workspace: &mut Workspace, images_dir: &Path) -> Result<()> {
        let WorkspaceKind::ThinVolume {
            link,
            mount_point,
            mounted,
            ..
        } = &mut workspace.kind
        else {
            return Err(DepotError::Internal("workspace is not a thin volume".into()));
        };

        if *mounted {
            self.unmount(mount_point)?;
            *mounted = false;
        }
        remove_mount_dir(mount_point);

        let target = sidecar_path(images_dir, &workspace.fingerprint, ".lv");
        std::fs::rename(&*link, &target).map_err(|e| {
            DepotError::StorageBackend(format!(
                "failed to move {} to {}: {}",
                link.display(),
                target.display(),
                e
            ))
        })?;
        *link = target;
        Ok(())
    }

    fn discard(&self, workspace: &mut Workspace) -> Result<()> {
        self.teardown(workspace)
    }

    fn delete_image_store(&self, images_dir: &Path, fingerprint: &str) -> Result<()> {
        remove_sidecars(self.runner.as_ref(), images_dir, fingerprint)
    }

    fn cleanup_build_dir(&self, build_dir: &Path) -> Vec<String> {
        cleanup_build_entries(self.runner.as_ref(), build_dir)
    }
}

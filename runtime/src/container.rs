//! Container export: turns a container or snapshot into an image tarball.

use depot_core::container::{is_snapshot, split_snapshot};
use depot_core::error::{DepotError, Result};
use depot_core::image::{host_architecture, ImageMetadata, ImageSource};
use std::path::{Path, PathBuf};

use crate::archive::{self, METADATA_FILE};

/// Produces a gzipped image tarball from a container or snapshot.
pub trait ContainerExporter: Send + Sync {
    /// Write the tarball into `build_dir` and return its path.
    fn export(&self, source: &ImageSource, build_dir: &Path) -> Result<PathBuf>;
}

/// Validate the `source` section of an image build request.
pub fn validate_source(source: &ImageSource) -> Result<()> {
    if source.name.is_empty() {
        return Err(DepotError::BadRequest("No source name provided".into()));
    }
    match source.source_type.as_str() {
        "container" if is_snapshot(&source.name) => {
            Err(DepotError::BadRequest("This is a snapshot".into()))
        }
        "snapshot" if !is_snapshot(&source.name) => {
            Err(DepotError::BadRequest("Not a snapshot".into()))
        }
        "container" | "snapshot" => Ok(()),
        _ => Err(DepotError::BadRequest("Bad type".into())),
    }
}

/// Exports containers stored as plain directories:
/// `<containers>/<name>` and `<snapshots>/<name>/<snapshot>`.
pub struct DirContainerExporter {
    containers_dir: PathBuf,
    snapshots_dir: PathBuf,
}

impl DirContainerExporter {
    pub fn new(containers_dir: PathBuf, snapshots_dir: PathBuf) -> Self {
        Self {
            containers_dir,
            snapshots_dir,
        }
    }

    fn source_path(&self, name: &str) -> PathBuf {
        match split_snapshot(name) {
            Some((container, snapshot)) => self.snapshots_dir.join(container).join(snapshot),
            None => self.containers_dir.join(name),
        }
    }
}

impl ContainerExporter for DirContainerExporter {
    fn export(&self, source: &ImageSource, build_dir: &Path) -> Result<PathBuf> {
        validate_source(source)?;

        let path = self.source_path(&source.name);
        if !path.is_dir() {
            return Err(DepotError::NotFound(format!("container {}", source.name)));
        }

        // Containers without their own metadata get one describing the host.
        let generated = if path.join(METADATA_FILE).exists() {
            None
        } else {
            let metadata = ImageMetadata {
                architecture: host_architecture().to_string(),
                creation_date: chrono::Utc::now().timestamp(),
                ..Default::default()
            };
            Some(serde_yaml::to_string(&metadata)?)
        };
        let extra: Vec<(&str, &[u8])> = generated
            .as_deref()
            .map(|m| vec![(METADATA_FILE, m.as_bytes())])
            .unwrap_or_default();

        let tarball = build_dir.join("container.tar.gz");
        archive::pack_directory_gz(&path, &tarball, &extra)?;

        tracing::info!(source = %source.name, tarball = %tarball.display(), "Exported container");
        Ok(tarball)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::noise;
    use tempfile::TempDir;

    fn source(kind: &str, name: &str) -> ImageSource {
        ImageSource {
            source_type: kind.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_validate_source() {
        assert!(validate_source(&source("container", "c1")).is_ok());
        assert!(validate_source(&source("snapshot", "c1/s0")).is_ok());

        let err = validate_source(&source("container", "c1/s0")).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: This is a snapshot");
        let err = validate_source(&source("snapshot", "c1")).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Not a snapshot");
        let err = validate_source(&source("vm", "c1")).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Bad type");
    }

    #[test]
    fn test_export_container_generates_metadata() {
        let var = TempDir::new().unwrap();
        let containers = var.path().join("containers");
        std::fs::create_dir_all(containers.join("c1/rootfs/etc")).unwrap();
        std::fs::write(containers.join("c1/rootfs/etc/hostname"), "c1").unwrap();
        std::fs::write(containers.join("c1/rootfs/blob"), noise(1024)).unwrap();

        let exporter = DirContainerExporter::new(containers, var.path().join("snapshots"));
        let build = TempDir::new().unwrap();
        let tarball = exporter.export(&source("container", "c1"), build.path()).unwrap();

        let metadata = archive::read_image_metadata(&tarball).unwrap();
        assert_eq!(metadata.architecture, host_architecture());
        assert!(metadata.creation_date > 0);
    }

    #[test]
    fn test_export_snapshot_keeps_metadata() {
        let var = TempDir::new().unwrap();
        let snapshot = var.path().join("snapshots/c1/s0");
        std::fs::create_dir_all(snapshot.join("rootfs")).unwrap();
        std::fs::write(snapshot.join(METADATA_FILE), "architecture: aarch64\n").unwrap();
        std::fs::write(snapshot.join("rootfs/blob"), noise(1024)).unwrap();

        let exporter = DirContainerExporter::new(var.path().join("containers"), var.path().join("snapshots"));
        let build = TempDir::new().unwrap();
        let tarball = exporter.export(&source("snapshot", "c1/s0"), build.path()).unwrap();

        let metadata = archive::read_image_metadata(&tarball).unwrap();
        assert_eq!(metadata.architecture, "aarch64");
    }

    #[test]
    fn test_export_missing_container() {
        let var = TempDir::new().unwrap();
        let exporter = DirContainerExporter::new(var.path().join("containers"), var.path().join("snapshots"));
        let build = TempDir::new().unwrap();
        let err = exporter.export(&source("container", "ghost"), build.path()).unwrap_err();
        assert!(matches!(err, DepotError::NotFound(_)));
    }
}

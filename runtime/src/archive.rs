//! Tar extraction for image archives.
//!
//! Archives are decoded in-process with the `tar` crate using the
//! decompressor picked by [`compression::detect`](crate::compression::detect).

use depot_core::error::{DepotError, Result};
use depot_core::image::ImageMetadata;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::Archive;

use crate::compression;

/// Name of the metadata document inside image archives.
pub const METADATA_FILE: &str = "metadata.yaml";

/// Sidecar path holding the rootfs half of a split upload.
pub fn rootfs_sidecar(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".rootfs");
    PathBuf::from(name)
}

fn first_line(e: &dyn std::fmt::Display) -> String {
    e.to_string().lines().next().unwrap_or_default().to_string()
}

/// Unpack `archive` into `dest`.
///
/// Ownership is preserved only when running as root.
pub fn untar(archive: &Path, dest: &Path) -> Result<()> {
    let compression = compression::detect(archive)?;
    let reader = compression.open(archive)?;

    std::fs::create_dir_all(dest)?;

    let mut tar = Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    // SAFETY: geteuid has no preconditions.
    tar.set_preserve_ownerships(unsafe { libc::geteuid() } == 0);
    tar.unpack(dest).map_err(|e| {
        DepotError::ExtractionFailed(format!(
            "failed to unpack {} into {}: {}",
            archive.display(),
            dest.display(),
            first_line(&e)
        ))
    })?;

    tracing::debug!(
        archive = %archive.display(),
        dest = %dest.display(),
        compression = compression.extension(),
        "Unpacked archive"
    );
    Ok(())
}

/// Unpack an image into `dest`, including its `.rootfs` sidecar if present.
pub fn untar_image(archive: &Path, dest: &Path) -> Result<()> {
    untar(archive, dest)?;

    let rootfs_archive = rootfs_sidecar(archive);
    if rootfs_archive.exists() {
        let rootfs = dest.join("rootfs");
        std::fs::create_dir_all(&rootfs)?;
        std::fs::set_permissions(&rootfs, std::fs::Permissions::from_mode(0o700))?;
        untar(&rootfs_archive, &rootfs)?;
    }
    Ok(())
}

fn normalize_member(path: &Path) -> &Path {
    path.strip_prefix("./").unwrap_or(path)
}

/// Read a single member of `archive` without unpacking the rest.
pub fn extract_single_file(archive: &Path, name: &str) -> Result<Vec<u8>> {
    let compression = compression::detect(archive)?;
    let reader = compression.open(archive)?;
    let wanted = normalize_member(Path::new(name));

    let extraction_error = |e: std::io::Error| {
        DepotError::ExtractionFailed(format!(
            "Could not extract {} from {}: {}",
            name,
            archive.display(),
            first_line(&e)
        ))
    };

    let mut tar = Archive::new(reader);
    for entry in tar.entries().map_err(extraction_error)? {
        let mut entry = entry.map_err(extraction_error)?;
        let path = entry.path().map_err(extraction_error)?.into_owned();
        if normalize_member(&path) == wanted {
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(extraction_error)?;
            return Ok(data);
        }
    }

    Err(DepotError::ExtractionFailed(format!(
        "Could not extract {} from {}: no such member",
        name,
        archive.display()
    )))
}

/// Read and parse `metadata.yaml` from an image archive.
pub fn read_image_metadata(archive: &Path) -> Result<ImageMetadata> {
    let data = extract_single_file(archive, METADATA_FILE)?;
    serde_yaml::from_slice(&data).map_err(|e| {
        DepotError::BadRequest(format!("Could not parse image metadata: {}", e))
    })
}

/// Pack the contents of `src` into a gzipped tar at `dest`.
///
/// `extra` members are appended after the directory tree.
pub fn pack_directory_gz(src: &Path, dest: &Path, extra: &[(&str, &[u8])]) -> Result<()> {
    let file = File::create(dest).map_err(|e| {
        DepotError::Internal(format!("Failed to create {}: {}", dest.display(), e))
    })?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    builder.append_dir_all(".", src).map_err(|e| {
        DepotError::Internal(format!("Failed to pack {}: {}", src.display(), e))
    })?;

    for (name, content) in extra {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
        header.set_cksum();
        builder.append_data(&mut header, name, *content)?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{noise, write_tar, write_tar_gz};
    use tempfile::TempDir;

    #[test]
    fn test_untar_gzip() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar.gz");
        write_tar_gz(&archive, &[("rootfs/etc/hostname", b"box"), ("metadata.yaml", b"{}")]);

        let dest = tmp.path().join("out");
        untar(&archive, &dest).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("rootfs/etc/hostname")).unwrap(),
            "box"
        );
    }

    #[test]
    fn test_untar_image_with_rootfs_sidecar() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("meta");
        write_tar(&archive, &[("metadata.yaml", b"architecture: x86_64\n")]);
        write_tar_gz(&rootfs_sidecar(&archive), &[("bin/sh", b"#!")]);

        let dest = tmp.path().join("out");
        untar_image(&archive, &dest).unwrap();

        assert!(dest.join("metadata.yaml").exists());
        assert!(dest.join("rootfs/bin/sh").exists());
        let mode = std::fs::metadata(dest.join("rootfs")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_untar_corrupt_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("bad.tar");
        let mut data = vec![b'x'; 1024];
        data[257..262].copy_from_slice(b"ustar");
        std::fs::write(&archive, data).unwrap();

        let result = untar(&archive, &tmp.path().join("out"));
        assert!(matches!(result, Err(DepotError::ExtractionFailed(_))));
    }

    #[test]
    fn test_extract_single_file_strips_dot_prefix() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar");
        write_tar(&archive, &[("./metadata.yaml", b"architecture: aarch64\n")]);

        let data = extract_single_file(&archive, METADATA_FILE).unwrap();
        assert_eq!(data, b"architecture: aarch64\n");
    }

    #[test]
    fn test_extract_single_file_missing() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar");
        write_tar(&archive, &[("other", b"x")]);

        let err = extract_single_file(&archive, METADATA_FILE).unwrap_err();
        assert!(matches!(err, DepotError::ExtractionFailed(_)));
        assert!(err.to_string().contains("metadata.yaml"));
    }

    #[test]
    fn test_read_image_metadata() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar.gz");
        write_tar_gz(
            &archive,
            &[(
                "metadata.yaml",
                b"architecture: x86_64\nproperties:\n  os: alpine\n  release: \"3.12\"\n",
            )],
        );

        let metadata = read_image_metadata(&archive).unwrap();
        assert_eq!(metadata.architecture, "x86_64");
        assert_eq!(metadata.properties["os"], "alpine");
    }

    #[test]
    fn test_read_image_metadata_invalid_yaml() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar");
        write_tar(&archive, &[("metadata.yaml", b"architecture: [unclosed\n")]);

        assert!(matches!(
            read_image_metadata(&archive),
            Err(DepotError::BadRequest(_))
        ));
    }

    #[test]
    fn test_pack_directory_gz() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("c1");
        std::fs::create_dir_all(src.join("rootfs/etc")).unwrap();
        std::fs::write(src.join("rootfs/etc/os-release"), "ID=alpine").unwrap();
        std::fs::write(src.join("rootfs/blob"), noise(2048)).unwrap();

        let dest = tmp.path().join("c1.tar.gz");
        pack_directory_gz(&src, &dest, &[("metadata.yaml", b"architecture: x86_64\n")]).unwrap();

        assert_eq!(compression::detect(&dest).unwrap(), compression::Compression::Gzip);
        let metadata = read_image_metadata(&dest).unwrap();
        assert_eq!(metadata.architecture, "x86_64");
        let release = extract_single_file(&dest, "rootfs/etc/os-release").unwrap();
        assert_eq!(release, b"ID=alpine");
    }
}

//! Upload staging: build directories, streaming and hashing.

use bytes::Bytes;
use depot_core::error::{DepotError, Result};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

use crate::storage::StorageBackend;

/// Prefix of per-upload build directories under the images directory.
pub const BUILD_DIR_PREFIX: &str = "depot_build_";

/// Per-upload scratch directory.
///
/// Dropping it releases storage objects left inside (LVs, subvolumes,
/// mount points) and removes the directory.
pub struct BuildDir {
    dir: Option<TempDir>,
    backend: Arc<dyn StorageBackend>,
}

impl BuildDir {
    pub fn new(images_dir: &Path, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        std::fs::create_dir_all(images_dir).map_err(|e| {
            DepotError::Internal(format!(
                "Failed to create images directory {}: {}",
                images_dir.display(),
                e
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(BUILD_DIR_PREFIX)
            .tempdir_in(images_dir)
            .map_err(|e| {
                DepotError::Internal(format!(
                    "Failed to create build directory in {}: {}",
                    images_dir.display(),
                    e
                ))
            })?;
        Ok(Self {
            dir: Some(dir),
            backend,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Release the directory now, on the calling thread.
    pub fn close(mut self) {
        if let Some(dir) = self.dir.take() {
            release(self.backend.as_ref(), dir);
        }
    }
}

/// Dropped inside a runtime, the release runs on the blocking pool.
impl Drop for BuildDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let backend = Arc::clone(&self.backend);
                handle.spawn_blocking(move || release(backend.as_ref(), dir));
            }
            Err(_) => release(self.backend.as_ref(), dir),
        }
    }
}

fn release(backend: &dyn StorageBackend, dir: TempDir) {
    for error in backend.cleanup_build_dir(dir.path()) {
        tracing::warn!(path = %dir.path().display(), error = %error, "Build directory cleanup failed");
    }
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove build directory");
    }
}

/// SHA-256 over every byte of an upload, across all of its parts.
#[derive(Default, Clone)]
pub struct UploadDigest {
    hasher: Sha256,
    size: u64,
}

impl UploadDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.size += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lower-case hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// SHA-256 of a file on disk.
pub fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut digest = UploadDigest::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    let size = digest.size();
    Ok((digest.finish(), size))
}

/// Write `stream` to `path`, feeding every chunk through `digest`.
pub async fn stream_to_file<S, E>(stream: S, path: &Path, digest: &mut UploadDigest) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut file = tokio::fs::File::create(path).await.map_err(|e| {
        DepotError::Internal(format!("Failed to create {}: {}", path.display(), e))
    })?;

    let mut stream = std::pin::pin!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| DepotError::BadRequest(format!("Failed to read upload: {}", e)))?;
        digest.update(&chunk);
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok(written)
}

/// Staged upload waiting for ingestion.
///
/// Either one tarball (which may turn out to be a JSON request to build the
/// image from a container), or a metadata tarball followed by a rootfs
/// tarball.
pub struct ImageUpload {
    pub(crate) build: BuildDir,
    pub(crate) digest: UploadDigest,
    pub(crate) tarball: Option<PathBuf>,
    pub(crate) rootfs: Option<PathBuf>,
}

impl ImageUpload {
    pub(crate) fn new(build: BuildDir) -> Self {
        Self {
            build,
            digest: UploadDigest::new(),
            tarball: None,
            rootfs: None,
        }
    }

    pub fn build_dir(&self) -> &Path {
        self.build.path()
    }

    /// Drop a staged upload, releasing its build directory on the blocking
    /// pool and waiting for it.
    pub async fn discard(self) {
        let build = self.build;
        if let Err(e) = tokio::task::spawn_blocking(move || build.close()).await {
            tracing::warn!(error = %e, "Build directory release task failed");
        }
    }

    /// Body of a non-multipart upload.
    pub async fn write_tarball<S, E>(&mut self, stream: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        self.write_metadata(stream).await
    }

    /// `metadata` part of a split upload. Must come first.
    pub async fn write_metadata<S, E>(&mut self, stream: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        if self.tarball.is_some() {
            return Err(DepotError::BadRequest("Invalid multipart image".into()));
        }
        let path = self.build.path().join("upload");
        let written = stream_to_file(stream, &path, &mut self.digest).await?;
        self.tarball = Some(path);
        Ok(written)
    }

    /// `rootfs` part of a split upload.
    pub async fn write_rootfs<S, E>(&mut self, stream: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        if self.tarball.is_none() || self.rootfs.is_some() {
            return Err(DepotError::BadRequest("Invalid multipart image".into()));
        }
        let path = self.build.path().join("upload.rootfs");
        let written = stream_to_file(stream, &path, &mut self.digest).await?;
        self.rootfs = Some(path);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DirBackend, RecordingRunner};
    use tempfile::TempDir;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    fn backend() -> Arc<dyn StorageBackend> {
        Arc::new(DirBackend::new(Arc::new(RecordingRunner::default())))
    }

    #[test]
    fn test_digest_matches_sha256() {
        let mut digest = UploadDigest::new();
        digest.update(b"hello ");
        digest.update(b"world");
        assert_eq!(digest.size(), 11);
        assert_eq!(
            digest.finish(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_build_dir_removed_on_drop() {
        let images = TempDir::new().unwrap();
        let path = {
            let build = BuildDir::new(images.path(), backend()).unwrap();
            std::fs::write(build.path().join("upload"), b"data").unwrap();
            assert!(build
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(BUILD_DIR_PREFIX));
            build.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_build_dir_dropped_on_worker_is_released() {
        let images = TempDir::new().unwrap();
        let build = BuildDir::new(images.path(), backend()).unwrap();
        std::fs::write(build.path().join("upload"), b"data").unwrap();
        let path = build.path().to_path_buf();

        // Dropped inside the runtime: cleanup moves to the blocking pool.
        drop(build);
        for _ in 0..200 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_discard_releases_before_returning() {
        let images = TempDir::new().unwrap();
        let mut upload = ImageUpload::new(BuildDir::new(images.path(), backend()).unwrap());
        upload.write_tarball(chunks(&[b"partial"])).await.unwrap();
        let path = upload.build_dir().to_path_buf();

        upload.discard().await;
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(images.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_stream_to_file_hashes_and_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out");
        let mut digest = UploadDigest::new();

        let written = stream_to_file(chunks(&[b"hello ", b"world"]), &path, &mut digest)
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        assert_eq!(digest.finish(), hash_file(&path).unwrap().0);
    }

    #[tokio::test]
    async fn test_stream_error_is_bad_request() {
        let tmp = TempDir::new().unwrap();
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"x")),
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset")),
        ]);
        let result = stream_to_file(stream, &tmp.path().join("out"), &mut UploadDigest::new()).await;
        assert!(matches!(result, Err(DepotError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_split_upload_hashes_both_parts() {
        let images = TempDir::new().unwrap();
        let mut upload = ImageUpload::new(BuildDir::new(images.path(), backend()).unwrap());

        assert!(upload.write_rootfs(chunks(&[b"rootfs"])).await.is_err());
        upload.write_metadata(chunks(&[b"meta"])).await.unwrap();
        upload.write_rootfs(chunks(&[b"rootfs"])).await.unwrap();

        let mut expected = UploadDigest::new();
        expected.update(b"metarootfs");
        assert_eq!(upload.digest.clone().finish(), expected.finish());
        assert!(upload.write_rootfs(chunks(&[b"again"])).await.is_err());
    }
}

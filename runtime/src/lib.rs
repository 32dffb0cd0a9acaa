//! Depot runtime: image ingestion, storage backends, metadata store and
//! the image and alias services the daemon serves.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod compression;
pub mod container;
pub mod daemon;
pub mod db;
pub mod images;
pub mod storage;

#[cfg(test)]
mod testutil;

// Re-export common types
pub use compression::Compression;
pub use container::{ContainerExporter, DirContainerExporter};
pub use daemon::Daemon;
pub use db::Database;
pub use images::{
    Access, AliasService, ExportFile, ImageExport, ImageIngest, ImageService, ImageUpload,
    IngestOptions,
};
pub use storage::{CommandRunner, StorageBackend, SystemRunner};

/// Depot runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Image ingestion, lookup and aliases.

mod alias;
mod ingest;
mod service;
mod upload;

pub use alias::AliasService;
pub use ingest::{parse_property_headers, FingerprintClaims, ImageIngest, IngestOptions};
pub use service::{Access, ExportFile, ImageExport, ImageService};
pub use upload::{hash_file, BuildDir, ImageUpload, UploadDigest, BUILD_DIR_PREFIX};

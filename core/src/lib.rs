//! Depot Core - Foundational Types and Abstractions
//!
//! This crate provides the types shared by the image runtime, the daemon
//! HTTP surface and the command line client: the error taxonomy, daemon
//! configuration, API documents, and the operation registry.

pub mod config;
pub mod container;
pub mod error;
pub mod image;
pub mod log;
pub mod operation;
pub mod response;

// Re-export commonly used types
pub use config::{DaemonConfig, StorageBackendKind, StorageConfig};
pub use error::{DepotError, ErrorKind, Result};
pub use image::{AliasInfo, ImageAlias, ImageInfo, ImageMetadata};
pub use operation::{Operation, OperationClass, OperationRegistry, OperationStatus};
pub use response::{ApiResponse, ResponseType};

/// Depot version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version segment every API path is rooted at.
pub const API_VERSION: &str = "1.0";

/// API compatibility level advertised by `GET /1.0`.
pub const API_COMPAT: u32 = 1;

//! Depot server: the HTTP surface of the image service.
//!
//! Routes:
//! - `/1.0`: server information
//! - `/1.0/images`: ingestion, lookup, export, secrets, deletion
//! - `/1.0/images/aliases`: alias CRUD
//! - `/1.0/operations`: operation records, cancel and wait

pub mod aliases;
pub mod api;
pub mod error;
pub mod images;
pub mod info;
pub mod operations;
pub mod response;
pub mod server;
pub mod state;

pub use api::router;
pub use server::DepotServer;
pub use state::AppState;

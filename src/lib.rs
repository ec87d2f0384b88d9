//! spool-files - Object storage and print-file inspection for a 3D print submission service
//!
//! This crate provides:
//! - Swappable object storage backends (local filesystem, GCS) behind one facade
//! - Object key validation and streaming content-type sniffing
//! - Preview extraction from STL, 3MF and sliced G-code 3MF files
//! - A small REST API for uploading, downloading, deleting and previewing files

pub mod api;
pub mod config;
pub mod inspect;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use config::Config;
use storage::Storage;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
}

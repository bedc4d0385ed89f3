//! S3-compatible blob storage adapter.
//!
//! This crate provides the `BlobStore` collaborator interface the
//! production pipeline consumes for uploading, downloading, and relocating
//! object-storage keys, plus the key-naming conventions for persisted
//! pipeline state.

pub mod blob;
pub mod client;
pub mod error;
pub mod keys;

pub use blob::{BlobStore, ObjectInfo};
pub use client::{BlobStoreConfig, S3Client};
pub use error::{StorageError, StorageResult};

//! `BlobStore`: the object-storage collaborator interface the pipeline
//! consumes. Implementations must accept URLs in either
//! `https://{bucket}.s3.{region}.amazonaws.com/{key}` or `s3://{bucket}/{key}`
//! form when translating between keys and URLs.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Size and content-type metadata returned by `Head`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub size: u64,
    pub content_type: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload raw bytes under `key`.
    async fn upload(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<()>;

    /// Upload the contents of a local file under `key`.
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Download `key` to `local_path`, creating parent directories as needed.
    async fn download(&self, key: &str, local_path: &Path) -> StorageResult<()>;

    /// Download `key` and return its bytes directly.
    async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Fetch size/content-type without downloading the body. Returns `None`
    /// when the object does not exist.
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Move an object from `old_key` to `new_key` (copy then delete; S3 has
    /// no native rename).
    async fn mv(&self, old_key: &str, new_key: &str) -> StorageResult<()>;

    /// Extract the object key from either URL form this store accepts.
    fn key_from_url(&self, url: &str) -> StorageResult<String>;

    /// Build this store's canonical URL for `key`.
    fn url_from_key(&self, key: &str) -> String;
}

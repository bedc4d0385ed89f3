//! S3-compatible blob storage client.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};
use url::Url;

use crate::blob::{BlobStore, ObjectInfo};
use crate::error::{StorageError, StorageResult};

/// Configuration for the S3-compatible client.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// S3 API endpoint. Set for S3-compatible providers (e.g. R2); leave
    /// unset to use AWS's default endpoint resolution.
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: String,
}

impl BlobStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("BLOB_ENDPOINT_URL").ok(),
            access_key_id: std::env::var("BLOB_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("BLOB_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("BLOB_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("BLOB_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("BLOB_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("BLOB_BUCKET_NAME not set"))?,
            region: std::env::var("BLOB_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// S3-compatible object storage client implementing `BlobStore`.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
    region: String,
}

impl S3Client {
    /// Create a new client from configuration.
    pub async fn new(config: BlobStoreConfig) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "pipeline-storage",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: config.bucket_name,
            region: config.region,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = BlobStoreConfig::from_env()?;
        Self::new(config).await
    }

    /// Check connectivity via a head-bucket request.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("connectivity check failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3Client {
    async fn upload(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<()> {
        debug!(key, bytes = data.len(), "uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(())
    }

    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!(path = %path.display(), key, "uploading file");

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!(path = %path.display(), key, "uploaded file");
        Ok(())
    }

    async fn download(&self, key: &str, local_path: &Path) -> StorageResult<()> {
        let bytes = self.download_bytes(key).await?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::DownloadFailed(format!("create dir: {e}")))?;
        }

        tokio::fs::write(local_path, bytes)
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("write file: {e}")))?;

        info!(key, path = %local_path.display(), "downloaded object");
        Ok(())
    }

    async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        debug!(key, "downloading object");

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(ObjectInfo {
                size: out.content_length().unwrap_or(0) as u64,
                content_type: out
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string(),
            })),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("NoSuchKey") {
                    Ok(None)
                } else {
                    Err(StorageError::AwsSdk(e.to_string()))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!(key, "deleting object");

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(())
    }

    async fn mv(&self, old_key: &str, new_key: &str) -> StorageResult<()> {
        debug!(old_key, new_key, "moving object");

        let copy_source = format!("{}/{}", self.bucket, old_key);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(&copy_source)
            .key(new_key)
            .send()
            .await
            .map_err(|e| StorageError::move_failed(format!("copy failed: {e}")))?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(old_key)
            .send()
            .await
            .map_err(|e| StorageError::move_failed(format!("delete of source failed: {e}")))?;

        info!(old_key, new_key, "moved object");
        Ok(())
    }

    fn key_from_url(&self, url: &str) -> StorageResult<String> {
        if let Some(rest) = url.strip_prefix("s3://") {
            let (_bucket, key) = rest
                .split_once('/')
                .ok_or_else(|| StorageError::invalid_url(url))?;
            return Ok(key.to_string());
        }

        let parsed = Url::parse(url).map_err(|_| StorageError::invalid_url(url))?;
        let path = parsed.path().trim_start_matches('/');
        if path.is_empty() {
            return Err(StorageError::invalid_url(url));
        }
        Ok(path.to_string())
    }

    fn url_from_key(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for_url_tests() -> S3Client {
        S3Client {
            client: Client::from_conf(
                Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new("us-east-1"))
                    .credentials_provider(Credentials::new("k", "s", None, None, "test"))
                    .build(),
            ),
            bucket: "listing-media".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    #[test]
    fn key_from_url_parses_s3_scheme() {
        let client = client_for_url_tests();
        let key = client
            .key_from_url("s3://listing-media/properties/abc/images/original/a.jpg")
            .unwrap();
        assert_eq!(key, "properties/abc/images/original/a.jpg");
    }

    #[test]
    fn key_from_url_parses_https_scheme() {
        let client = client_for_url_tests();
        let key = client
            .key_from_url("https://listing-media.s3.us-east-1.amazonaws.com/properties/abc/images/original/a.jpg")
            .unwrap();
        assert_eq!(key, "properties/abc/images/original/a.jpg");
    }

    #[test]
    fn url_from_key_round_trips_through_key_from_url() {
        let client = client_for_url_tests();
        let url = client.url_from_key("properties/abc/videos/runway/job1/0.mp4");
        let key = client.key_from_url(&url).unwrap();
        assert_eq!(key, "properties/abc/videos/runway/job1/0.mp4");
    }
}

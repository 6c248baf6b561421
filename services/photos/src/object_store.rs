use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Result of deleting an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Blob storage for raw image bytes
///
/// Any backend that can put, get, delete, sign and probe keys is acceptable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `path`, returning the key written
    async fn put(&self, bytes: Vec<u8>, path: &str, content_type: &str) -> Result<String>;

    /// Fetch the bytes stored under `path`
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Remove the object under `path`
    async fn delete(&self, path: &str) -> Result<DeleteOutcome>;

    /// Time-limited read URL for `path`
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String>;

    /// Whether an object exists under `path`
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Bucket-qualified URI, as recorded in metadata documents
    fn uri(&self, path: &str) -> String;
}

/// S3-compatible object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put(&self, bytes: Vec<u8>, path: &str, content_type: &str) -> Result<String> {
        let size_bytes = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        debug!(key = %path, size_bytes, "Object uploaded");
        Ok(path.to_string())
    }

    #[instrument(skip(self))]
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .context("Failed to fetch object from S3")?;

        let body = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?;

        Ok(body.into_bytes().to_vec())
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<DeleteOutcome> {
        // S3 deletes succeed for missing keys, so probe first to report NotFound
        if !self.exists(path).await? {
            return Ok(DeleteOutcome::NotFound);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .context("Failed to delete object from S3")?;

        debug!(key = %path, "Object deleted");
        Ok(DeleteOutcome::Deleted)
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String> {
        let presigning_config =
            PresigningConfig::expires_in(ttl).context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(presigned.uri().to_string())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e).context("Failed to check object existence")
                }
            }
        }
    }

    fn uri(&self, path: &str) -> String {
        format!("s3://{}/{}", self.bucket, path)
    }
}

//! S3-compatible object store for uploaded files.

use super::source::ObjectStore;
use crate::error::DataGateError;
use crate::Result;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use tokio::sync::OnceCell;
use tracing::debug;

/// Environment variable naming the default upload bucket.
pub const UPLOAD_BUCKET_ENV: &str = "DATAGATE_UPLOAD_BUCKET";

/// Reads uploads from S3 (or an S3-compatible endpoint configured through
/// the standard AWS environment).
///
/// The SDK client is built on first use.
#[derive(Debug, Default)]
pub struct S3ObjectStore {
    default_bucket: Option<String>,
    client: OnceCell<Client>,
}

impl S3ObjectStore {
    pub fn new(default_bucket: Option<String>) -> Self {
        Self {
            default_bucket,
            client: OnceCell::new(),
        }
    }

    /// Store whose default bucket comes from [`UPLOAD_BUCKET_ENV`].
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(UPLOAD_BUCKET_ENV)
                .ok()
                .filter(|b| !b.trim().is_empty()),
        )
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .load()
                    .await;
                debug!("S3 client created");
                Client::new(&config)
            })
            .await
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, bucket: Option<&str>, key: &str) -> Result<Vec<u8>> {
        let bucket = bucket
            .or(self.default_bucket.as_deref())
            .ok_or_else(|| DataGateError::configuration("No bucket given for object-store upload"))?;

        debug!(bucket, key, "Downloading upload");
        let response = self
            .client()
            .await
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                DataGateError::materialization_failed(
                    format!("Object '{}' not found in bucket '{}'", key, bucket),
                    e,
                )
            })?;

        let body = response.body.collect().await.map_err(|e| {
            DataGateError::materialization_failed(format!("Failed to download '{}'", key), e)
        })?;
        Ok(body.into_bytes().to_vec())
    }
}

use std::time::Duration;

use async_trait::async_trait;
use bytes::Buf;
use futures::{Stream, StreamExt};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

use super::error::StorageError;
use super::key::StorageKey;
use super::traits::{BlobStore, BoxReader};
use crate::config::StorageBackendConfig;

/// S3-compatible object storage.
///
/// Uploads and downloads are streamed. An upload that turns out larger than
/// `max_size` is deleted again after the transfer.
pub struct S3BlobStore {
    bucket: Box<Bucket>,
    max_size: u64,
}

impl S3BlobStore {
    pub fn from_config(config: &StorageBackendConfig, max_size: u64) -> Result<Self, StorageError> {
        let StorageBackendConfig::S3 {
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            path_style,
        } = config
        else {
            return Err(StorageError::Backend("not an S3 configuration".into()));
        };

        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.clone(),
                endpoint: endpoint.clone(),
            },
            None => region
                .parse()
                .map_err(|e| StorageError::Backend(format!("invalid S3 region: {e}")))?,
        };

        let credentials = Credentials::new(
            access_key.as_deref(),
            secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(format!("invalid S3 credentials: {e}")))?;

        let mut bucket = Bucket::new(bucket, region, credentials)
            .map_err(|e| StorageError::Backend(format!("S3 bucket init failed: {e}")))?;
        if *path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self { bucket, max_size })
    }
}

fn backend_err(op: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(format!("S3 {op} failed: {err}"))
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Adapt a fallible byte stream into an `AsyncRead`.
fn stream_reader<S, B, E>(stream: S) -> BoxReader
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: Buf + Send + Unpin + 'static,
    E: std::fmt::Display + 'static,
{
    Box::new(StreamReader::new(stream.map(|item| {
        item.map_err(|e| std::io::Error::other(e.to_string()))
    })))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn put_stream(&self, key: &StorageKey, reader: BoxReader) -> Result<u64, StorageError> {
        if self.exists(key).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        // One byte past the limit is enough to tell an oversized upload apart.
        let cap = self.max_size.saturating_add(1);
        let mut limited = reader.take(cap);
        let response = self
            .bucket
            .put_object_stream(&mut limited, key.as_str())
            .await
            .map_err(|e| backend_err("put", e))?;
        if !is_success(response.status_code()) {
            return Err(backend_err("put", format!("status {}", response.status_code())));
        }

        let size = cap - limited.limit();
        if size > self.max_size {
            if let Err(e) = self.bucket.delete_object(key.as_str()).await {
                tracing::warn!(storage_key = %key, error = %e, "Failed to remove oversized object");
            }
            return Err(StorageError::SizeLimitExceeded {
                actual: size,
                limit: self.max_size,
            });
        }
        Ok(size)
    }

    async fn get_stream(&self, key: &StorageKey) -> Result<BoxReader, StorageError> {
        let response = self
            .bucket
            .get_object_stream(key.as_str())
            .await
            .map_err(|e| match e {
                S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
                e => backend_err("get", e),
            })?;
        match response.status_code {
            404 => Err(StorageError::NotFound(key.to_string())),
            status if is_success(status) => Ok(stream_reader(response.bytes)),
            status => Err(backend_err("get", format!("status {status}"))),
        }
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        let (_, status) = self
            .bucket
            .head_object(key.as_str())
            .await
            .map_err(|e| backend_err("head", e))?;
        match status {
            404 => Ok(false),
            status if is_success(status) => Ok(true),
            status => Err(backend_err("head", format!("status {status}"))),
        }
    }

    async fn delete(&self, key: &StorageKey) -> Result<bool, StorageError> {
        let existed = self.exists(key).await?;
        let response = self
            .bucket
            .delete_object(key.as_str())
            .await
            .map_err(|e| backend_err("delete", e))?;
        match response.status_code() {
            404 => Ok(false),
            status if is_success(status) => Ok(existed),
            status => Err(backend_err("delete", format!("status {status}"))),
        }
    }

    async fn signed_url(
        &self,
        key: &StorageKey,
        ttl: Duration,
    ) -> Result<Option<String>, StorageError> {
        let expiry = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX);
        let url = self
            .bucket
            .presign_get(key.as_str(), expiry, None)
            .await
            .map_err(|e| backend_err("presign", e))?;
        Ok(Some(url))
    }
}

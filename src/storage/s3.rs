//! S3-compatible storage backend (AWS, MinIO, Ceph RGW, ...)

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::MetadataDirective;
use aws_sdk_s3::Client as S3Client;

use super::{ObjectStore, ObjectSummary, StoreConnector};
use crate::error::{Result, SyncError};
use crate::types::{BucketEndpoint, Metadata};

/// One authenticated session against an S3-compatible endpoint
pub struct S3Store {
    client: S3Client,
    endpoint: String,
}

impl S3Store {
    /// Build a client from the endpoint's static credentials
    pub async fn connect(endpoint: &BucketEndpoint) -> Result<Self> {
        let url = endpoint.url();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "Endpoint URL for {} must start with http:// or https://",
                endpoint.name
            )));
        }

        let credentials = Credentials::new(
            &endpoint.access_key,
            &endpoint.secret_key,
            None,
            None,
            "marksync",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(endpoint.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        // S3-compatible servers rarely support virtual-hosted buckets
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(&url)
            .force_path_style(true)
            .build();

        tracing::debug!("Opened S3 session for {} at {}", endpoint.name, url);

        Ok(Self {
            client: S3Client::from_conf(config),
            endpoint: url,
        })
    }

    fn storage_error<E>(&self, action: &str, target: &str, err: E) -> SyncError
    where
        E: std::error::Error,
    {
        SyncError::Storage(format!(
            "{} {} on {} failed: {}",
            action,
            target,
            self.endpoint,
            DisplayErrorContext(err)
        ))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    tracing::warn!("Bucket {} does not exist on {}", bucket, self.endpoint);
                    Ok(false)
                } else {
                    Err(self.storage_error("head_bucket", bucket, service_error))
                }
            }
        }
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| self.storage_error("list_objects_v2", bucket, e))?;

            objects.extend(response.contents().iter().filter_map(|obj| {
                obj.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            }));

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        tracing::debug!("Listed {} objects in {}", objects.len(), bucket);
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Metadata> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.storage_error("head_object", &format!("{}/{}", bucket, key), e))?;

        Ok(response.metadata().cloned().unwrap_or_default())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let target = format!("{}/{}", bucket, key);
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.storage_error("get_object", &target, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| self.storage_error("read body of", &target, e))?
            .into_bytes();

        Ok(data.to_vec())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| self.storage_error("put_object", &format!("{}/{}", bucket, key), e))?;

        tracing::debug!("Uploaded {} bytes to {}/{}", size, bucket, key);
        Ok(())
    }

    async fn copy_object_replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        let copy_source = format!("{}/{}", bucket, urlencoding::encode(key));

        self.client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source)
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| self.storage_error("copy_object", &format!("{}/{}", bucket, key), e))?;

        Ok(())
    }
}

/// Connector that opens a fresh [`S3Store`] per endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

#[async_trait]
impl StoreConnector for S3Connector {
    async fn connect(&self, endpoint: &BucketEndpoint) -> Result<Arc<dyn ObjectStore>> {
        let store = S3Store::connect(endpoint).await?;
        Ok(Arc::new(store))
    }
}

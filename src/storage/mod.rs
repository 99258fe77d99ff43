//! Object storage facade
//!
//! The reconciliation engine only talks to storage through [`ObjectStore`],
//! one session per endpoint, opened by a [`StoreConnector`]. Two backends
//! ship with the crate:
//!
//! - `s3`: any S3-compatible endpoint via aws-sdk-s3 (feature `s3`)
//! - `memory`: an in-process store with fault injection, used by tests and
//!   benchmarks

pub mod memory;
#[cfg(feature = "s3")]
mod s3;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BucketEndpoint, Metadata};

pub use memory::{InMemoryConnector, InMemorySession, InMemoryStore, StoreOp, StoredObject};
#[cfg(feature = "s3")]
pub use s3::{S3Connector, S3Store};

/// One entry of a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// Operations the sync engine needs from one storage endpoint
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Endpoint URL, for log context
    fn endpoint(&self) -> &str;

    /// `Ok(false)` for a missing bucket; network and auth failures are errors
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Every object in the bucket (all pages)
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>>;

    /// User metadata of one object
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Metadata>;

    /// Full object body
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    /// Copy an object onto itself, replacing its user metadata wholesale
    async fn copy_object_replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Metadata,
    ) -> Result<()>;
}

/// Opens storage sessions for endpoints
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, endpoint: &BucketEndpoint) -> Result<Arc<dyn ObjectStore>>;
}

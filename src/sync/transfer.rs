//! Per-object transfer
//!
//! Body first, marker second: the source object is only marked after the
//! target write has succeeded.

use std::sync::Arc;

use crate::storage::ObjectStore;
use crate::types::{Marker, ObjectRecord};

/// How one scheduled transfer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    /// Body written to target and source marked
    Copied,
    /// Read or write of the body failed; source left unmarked
    CopyFailed(String),
    /// Body is in the target but the marker write failed; the object will
    /// be copied again next cycle
    MarkFailed(String),
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferResult::Copied)
    }
}

/// Everything one transfer task needs, owned so it can be spawned
pub struct TransferJob {
    pub source: Arc<dyn ObjectStore>,
    pub target: Arc<dyn ObjectStore>,
    pub source_bucket: String,
    pub target_bucket: String,
    pub record: ObjectRecord,
    pub marker: Marker,
}

impl TransferJob {
    pub async fn run(self) -> TransferResult {
        let key = &self.record.key;

        let body = match self.source.get_object(&self.source_bucket, key).await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(
                    "Error copying {} from {} to {}: {}",
                    key,
                    self.source_bucket,
                    self.target_bucket,
                    e
                );
                return TransferResult::CopyFailed(e.to_string());
            }
        };

        let size = body.len();
        if let Err(e) = self.target.put_object(&self.target_bucket, key, body).await {
            tracing::error!(
                "Error copying {} from {} to {}: {}",
                key,
                self.source_bucket,
                self.target_bucket,
                e
            );
            return TransferResult::CopyFailed(e.to_string());
        }

        let metadata = self.marker.apply(&self.record.metadata);
        if let Err(e) = self
            .source
            .copy_object_replace_metadata(&self.source_bucket, key, &metadata)
            .await
        {
            tracing::error!(
                "Copied {} to {} but failed to mark it in {}: {}",
                key,
                self.target_bucket,
                self.source_bucket,
                e
            );
            return TransferResult::MarkFailed(e.to_string());
        }

        tracing::info!(
            "Copied {} ({} bytes) from {} to {}",
            key,
            size,
            self.source_bucket,
            self.target_bucket
        );
        TransferResult::Copied
    }
}

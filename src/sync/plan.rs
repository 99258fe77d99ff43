//! Synchronization planning
//!
//! Metadata for every listed source object is read one object at a time and
//! the whole snapshot is taken before any transfer starts. The first failed
//! read aborts planning for the pair.

use crate::error::SyncError;
use crate::storage::{ObjectStore, ObjectSummary};
use crate::types::{Marker, ObjectRecord};

/// What needs copying and what is already marked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Objects whose marker is missing or different
    pub pending: Vec<ObjectRecord>,
    /// Objects already carrying the marker
    pub synchronized: Vec<ObjectRecord>,
}

impl SyncPlan {
    /// Split records by marker state, keeping their order
    pub fn from_records(records: Vec<ObjectRecord>, marker: &Marker) -> Self {
        let (synchronized, pending) = records
            .into_iter()
            .partition(|record| record.is_synchronized(marker));
        Self {
            pending,
            synchronized,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.synchronized.is_empty()
    }

    pub fn pending_keys(&self) -> Vec<&str> {
        self.pending.iter().map(|r| r.key.as_str()).collect()
    }
}

/// Metadata read that stopped planning
#[derive(Debug)]
pub struct MetadataFailure {
    pub key: String,
    pub error: SyncError,
}

/// Read source metadata for every listed object, in listing order
pub async fn snapshot_source(
    store: &dyn ObjectStore,
    bucket: &str,
    objects: &[ObjectSummary],
    marker: &Marker,
) -> Result<SyncPlan, MetadataFailure> {
    let mut records = Vec::with_capacity(objects.len());

    for object in objects {
        let metadata = store
            .head_object(bucket, &object.key)
            .await
            .map_err(|error| MetadataFailure {
                key: object.key.clone(),
                error,
            })?;
        records.push(ObjectRecord::from_source(&object.key, metadata, marker));
    }

    let plan = SyncPlan::from_records(records, marker);
    tracing::debug!(
        "Planned {}: {} pending, {} already synchronized",
        bucket,
        plan.pending.len(),
        plan.synchronized.len()
    );
    Ok(plan)
}

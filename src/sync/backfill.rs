//! Marker backfill
//!
//! Marks source objects that already exist in the target, so a mirror built
//! by other means is not copied again. Only metadata is written; no object
//! bodies move.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::pool::TaskPool;
use crate::storage::{ObjectStore, StoreConnector};
use crate::types::{BucketPair, Marker};

/// Counts for one pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub pair: String,
    /// Source endpoint opted out with `managed_s3_mark: false`
    pub skipped: bool,
    /// Set when the pair could not be inspected at all
    pub failure: Option<String>,
    /// Keys present in both buckets
    pub common: usize,
    /// Keys only in the source and not marked
    pub missing_unmarked: usize,
    pub already_marked: usize,
    /// Marked by this run (or that would be, in a dry run)
    pub newly_marked: usize,
    /// Per-object metadata reads or writes that failed
    pub errors: usize,
}

impl BackfillReport {
    fn new(pair: &BucketPair) -> Self {
        Self {
            pair: pair.name.clone(),
            ..Self::default()
        }
    }

    pub fn message(&self) -> String {
        if self.skipped {
            return format!("Skipping pair {}: marker management disabled", self.pair);
        }
        if let Some(failure) = &self.failure {
            return format!("Backfill of pair {} failed: {}", self.pair, failure);
        }
        format!(
            "Pair {}: {} common, {} missing and unmarked, {} already marked, {} newly marked, {} errors",
            self.pair,
            self.common,
            self.missing_unmarked,
            self.already_marked,
            self.newly_marked,
            self.errors
        )
    }
}

/// Backfill markers for one pair
pub async fn backfill_pair(
    connector: &dyn StoreConnector,
    pair: &BucketPair,
    marker: &Marker,
    dry_run: bool,
) -> BackfillReport {
    let mut report = BackfillReport::new(pair);

    if !pair.source.managed_mark {
        tracing::info!("Skipping pair {}: managed_s3_mark is false", pair.describe());
        report.skipped = true;
        return report;
    }

    let source = match connector.connect(&pair.source).await {
        Ok(store) => store,
        Err(e) => {
            report.failure = Some(format!("connecting to source: {}", e));
            return report;
        }
    };
    let target = match connector.connect(&pair.target).await {
        Ok(store) => store,
        Err(e) => {
            report.failure = Some(format!("connecting to target: {}", e));
            return report;
        }
    };

    let source_bucket = &pair.source.bucket;
    let listed = tokio::try_join!(
        source.list_objects(source_bucket),
        target.list_objects(&pair.target.bucket),
    );
    let (source_objects, target_objects) = match listed {
        Ok(lists) => lists,
        Err(e) => {
            tracing::error!("Error listing objects for pair {}: {}", pair.name, e);
            report.failure = Some(format!("listing objects: {}", e));
            return report;
        }
    };

    let target_keys: BTreeSet<String> = target_objects.into_iter().map(|o| o.key).collect();
    let (common, missing): (Vec<String>, Vec<String>) = source_objects
        .into_iter()
        .map(|o| o.key)
        .partition(|key| target_keys.contains(key));
    report.common = common.len();

    for key in &missing {
        match source.head_object(source_bucket, key).await {
            Ok(metadata) if !marker.is_set_on(&metadata) => report.missing_unmarked += 1,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Error checking metadata for {} in {}: {}", key, source_bucket, e);
                report.errors += 1;
            }
        }
    }

    for key in &common {
        mark_common(source.as_ref(), source_bucket, key, marker, dry_run, &mut report).await;
    }

    tracing::info!("{}", report.message());
    report
}

async fn mark_common(
    source: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    marker: &Marker,
    dry_run: bool,
    report: &mut BackfillReport,
) {
    let metadata = match source.head_object(bucket, key).await {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::error!("Error checking metadata for {} in {}: {}", key, bucket, e);
            report.errors += 1;
            return;
        }
    };

    if marker.is_set_on(&metadata) {
        report.already_marked += 1;
        return;
    }

    if dry_run {
        tracing::info!("Dry run: would update metadata of {} in {}", key, bucket);
        report.newly_marked += 1;
        return;
    }

    match source
        .copy_object_replace_metadata(bucket, key, &marker.apply(&metadata))
        .await
    {
        Ok(()) => {
            tracing::info!("Marked {} in {}", key, bucket);
            report.newly_marked += 1;
        }
        Err(e) => {
            tracing::error!("Error marking {} in {}: {}", key, bucket, e);
            report.errors += 1;
        }
    }
}

/// Backfill every pair, at most `limit` pairs at a time
pub async fn backfill_all(
    connector: Arc<dyn StoreConnector>,
    pairs: &[BucketPair],
    marker: &Marker,
    dry_run: bool,
    limit: usize,
) -> Vec<BackfillReport> {
    let tasks = pairs.iter().cloned().map(|pair| {
        let connector = Arc::clone(&connector);
        let marker = marker.clone();
        async move { backfill_pair(connector.as_ref(), &pair, &marker, dry_run).await }
    });

    TaskPool::new(limit)
        .run_all(tasks)
        .await
        .into_iter()
        .zip(pairs)
        .map(|(result, pair)| {
            result.unwrap_or_else(|e| BackfillReport {
                failure: Some(e.to_string()),
                ..BackfillReport::new(pair)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryConnector, InMemoryStore, StoreOp};
    use crate::types::{BucketEndpoint, Metadata};

    fn endpoint(name: &str, bucket: &str) -> BucketEndpoint {
        BucketEndpoint {
            name: name.to_string(),
            bucket: bucket.to_string(),
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
            endpoint_url: "mem://local".to_string(),
            port: 9000,
            enabled: true,
            region: "us-east-1".to_string(),
            managed_mark: true,
        }
    }

    fn pair() -> BucketPair {
        BucketPair {
            name: "main".to_string(),
            source: endpoint("primary", "src"),
            target: endpoint("backup", "dst"),
        }
    }

    fn seeded() -> (Arc<InMemoryStore>, Marker) {
        let marker = Marker::new("synced", "1");
        let marked = marker.apply(&Metadata::new());
        let store = InMemoryStore::new();
        // a: in both, unmarked. b: in both, marked. c: source only, unmarked
        store.insert_object("src", "a", b"a", Metadata::new());
        store.insert_object("src", "b", b"b", marked);
        store.insert_object("src", "c", b"c", Metadata::new());
        store.insert_object("dst", "a", b"a", Metadata::new());
        store.insert_object("dst", "b", b"b", Metadata::new());
        (store, marker)
    }

    #[tokio::test]
    async fn test_marks_only_common_unmarked_objects() {
        let (store, marker) = seeded();
        let connector = InMemoryConnector::new(Arc::clone(&store));

        let report = backfill_pair(&connector, &pair(), &marker, false).await;
        assert_eq!(
            report,
            BackfillReport {
                pair: "main".to_string(),
                common: 2,
                missing_unmarked: 1,
                already_marked: 1,
                newly_marked: 1,
                ..BackfillReport::default()
            }
        );
        assert!(marker.is_set_on(&store.object("src", "a").unwrap().metadata));
        assert!(!marker.is_set_on(&store.object("src", "c").unwrap().metadata));
        assert_eq!(store.calls(StoreOp::Get), 0);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_writing() {
        let (store, marker) = seeded();
        let connector = InMemoryConnector::new(Arc::clone(&store));

        let report = backfill_pair(&connector, &pair(), &marker, true).await;
        assert_eq!(report.newly_marked, 1);
        assert_eq!(store.calls(StoreOp::CopyReplaceMetadata), 0);
    }

    #[tokio::test]
    async fn test_unmanaged_pair_skipped() {
        let (store, marker) = seeded();
        let connector = InMemoryConnector::new(Arc::clone(&store));
        let mut p = pair();
        p.source.managed_mark = false;

        let report = backfill_pair(&connector, &p, &marker, false).await;
        assert!(report.skipped);
        assert_eq!(store.calls(StoreOp::List), 0);
    }

    #[tokio::test]
    async fn test_object_errors_are_counted() {
        let (store, marker) = seeded();
        store.fail(StoreOp::CopyReplaceMetadata, "src", Some("a"), "denied");
        let connector = InMemoryConnector::new(Arc::clone(&store));

        let report = backfill_pair(&connector, &pair(), &marker, false).await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.newly_marked, 0);
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn test_listing_failure_fails_only_that_pair() {
        let (store, marker) = seeded();
        store.insert_object("other-src", "x", b"x", Metadata::new());
        store.insert_object("other-dst", "x", b"x", Metadata::new());
        store.fail(StoreOp::List, "dst", None, "timeout");
        let connector: Arc<dyn StoreConnector> =
            Arc::new(InMemoryConnector::new(Arc::clone(&store)));

        let other = BucketPair {
            name: "other".to_string(),
            source: endpoint("o1", "other-src"),
            target: endpoint("o2", "other-dst"),
        };
        let reports = backfill_all(connector, &[pair(), other], &marker, false, 2).await;

        assert!(reports[0].failure.is_some());
        assert!(reports[0].message().starts_with("Backfill of pair main failed"));
        assert_eq!(reports[1].newly_marked, 1);
    }
}

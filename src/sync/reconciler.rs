//! Per-pair reconciliation
//!
//! One call reconciles one pair and always returns an outcome: every storage
//! error is folded into the outcome status at the point where it happens.

use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use super::plan::{snapshot_source, MetadataFailure};
use super::pool::TaskPool;
use super::transfer::{TransferJob, TransferResult};
use crate::storage::{ObjectStore, StoreConnector};
use crate::types::{
    BucketPair, FailureStage, OutcomeStatus, ReconciliationOutcome, Side, SyncPolicy,
};

/// Reconciles single pairs against a fixed policy
#[derive(Clone)]
pub struct Reconciler {
    connector: Arc<dyn StoreConnector>,
    policy: Arc<SyncPolicy>,
}

impl Reconciler {
    pub fn new(connector: Arc<dyn StoreConnector>, policy: Arc<SyncPolicy>) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Reconcile one pair. Never fails; errors become the outcome.
    pub async fn reconcile(&self, pair: &BucketPair) -> ReconciliationOutcome {
        let started_at = Utc::now();
        let span = tracing::info_span!("reconcile", pair = %pair.name);
        let status = self.reconcile_status(pair).instrument(span).await;
        ReconciliationOutcome::new(pair, self.policy.dry_run, status, started_at)
    }

    async fn reconcile_status(&self, pair: &BucketPair) -> OutcomeStatus {
        if !pair.is_enabled() {
            tracing::info!("Skipping disabled pair {}", pair.describe());
            return OutcomeStatus::Skipped;
        }

        // Both sessions are dropped when this function returns, on every path
        let source = match self.connector.connect(&pair.source).await {
            Ok(store) => store,
            Err(e) => return connect_failure(Side::Source, e),
        };
        let target = match self.connector.connect(&pair.target).await {
            Ok(store) => store,
            Err(e) => return connect_failure(Side::Target, e),
        };

        tracing::info!("Checking and syncing bucket pair: {}", pair.describe());
        self.sync_pair(pair, source, target).await
    }

    async fn sync_pair(
        &self,
        pair: &BucketPair,
        source: Arc<dyn ObjectStore>,
        target: Arc<dyn ObjectStore>,
    ) -> OutcomeStatus {
        let source_bucket = &pair.source.bucket;
        let target_bucket = &pair.target.bucket;

        if self.policy.check_bucket_exists {
            let sides = [
                (Side::Source, &source, source_bucket),
                (Side::Target, &target, target_bucket),
            ];
            for (side, store, bucket) in sides {
                match store.bucket_exists(bucket).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return OutcomeStatus::BucketMissing {
                            side,
                            bucket: bucket.clone(),
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error checking {} bucket {}: {}", side, bucket, e);
                        return OutcomeStatus::Failed {
                            stage: FailureStage::ExistenceCheck {
                                side,
                                bucket: bucket.clone(),
                            },
                            detail: e.to_string(),
                        };
                    }
                }
            }
        }

        let objects = match source.list_objects(source_bucket).await {
            Ok(objects) => objects,
            Err(e) => {
                tracing::error!("Error listing objects in {}: {}", source_bucket, e);
                return OutcomeStatus::Failed {
                    stage: FailureStage::Listing,
                    detail: e.to_string(),
                };
            }
        };

        if objects.is_empty() {
            return OutcomeStatus::NoObjects;
        }

        let marker = &self.policy.marker;
        let plan = match snapshot_source(source.as_ref(), source_bucket, &objects, marker).await {
            Ok(plan) => plan,
            Err(MetadataFailure { key, error }) => {
                tracing::error!(
                    "Error getting metadata for {} in {}: {}",
                    key,
                    source_bucket,
                    error
                );
                return OutcomeStatus::Failed {
                    stage: FailureStage::Metadata { key },
                    detail: error.to_string(),
                };
            }
        };

        let already_synced = plan.synchronized.len();

        if self.policy.dry_run {
            for record in &plan.pending {
                tracing::info!(
                    "Dry run: would copy {} from {} to {}",
                    record.key,
                    source_bucket,
                    target_bucket
                );
                tracing::info!(
                    "Dry run: would update metadata of {} in {}",
                    record.key,
                    source_bucket
                );
            }
            return OutcomeStatus::Completed {
                copied: 0,
                failed: 0,
                already_synced,
                pending: plan.pending.len(),
            };
        }

        let jobs: Vec<_> = plan
            .pending
            .into_iter()
            .map(|record| {
                TransferJob {
                    source: Arc::clone(&source),
                    target: Arc::clone(&target),
                    source_bucket: source_bucket.clone(),
                    target_bucket: target_bucket.clone(),
                    record,
                    marker: marker.clone(),
                }
                .run()
                .in_current_span()
            })
            .collect();
        let scheduled = jobs.len();

        let pool = TaskPool::new(self.policy.max_concurrent_transfers);
        let results = pool.run_all(jobs).await;

        let failed = results
            .iter()
            .filter(|result| !matches!(result, Ok(TransferResult::Copied)))
            .count();
        if failed > 0 {
            tracing::warn!(
                "{} of {} transfers from {} to {} failed",
                failed,
                scheduled,
                source_bucket,
                target_bucket
            );
        }

        OutcomeStatus::Completed {
            copied: scheduled,
            failed,
            already_synced,
            pending: 0,
        }
    }
}

fn connect_failure(side: Side, err: crate::error::SyncError) -> OutcomeStatus {
    tracing::error!("Error connecting to {} endpoint: {}", side, err);
    OutcomeStatus::Failed {
        stage: FailureStage::Connect { side },
        detail: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryConnector, InMemoryStore, StoreOp};
    use crate::types::{BucketEndpoint, Marker, Metadata};

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

    fn marked() -> Metadata {
        let mut m = Metadata::new();
        m.insert("synced".to_string(), "1".to_string());
        m
    }

    fn reconciler(store: &Arc<InMemoryStore>, dry_run: bool) -> (Reconciler, InMemoryConnector) {
        let connector = InMemoryConnector::new(Arc::clone(store));
        let policy = SyncPolicy {
            marker: Marker::new("synced", "1"),
            dry_run,
            ..SyncPolicy::default()
        };
        (
            Reconciler::new(Arc::new(connector.clone()), Arc::new(policy)),
            connector,
        )
    }

    #[tokio::test]
    async fn test_disabled_pair_skipped_without_io() {
        let store = InMemoryStore::new();
        let (reconciler, _) = reconciler(&store, false);
        let mut p = pair();
        p.source.enabled = false;

        let outcome = reconciler.reconcile(&p).await;
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert_eq!(store.calls(StoreOp::BucketExists), 0);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_missing_target_bucket() {
        let store = InMemoryStore::new();
        store.insert_object("src", "a", b"a", Metadata::new());
        let (reconciler, _) = reconciler(&store, false);

        let outcome = reconciler.reconcile(&pair()).await;
        assert_eq!(outcome.message(), "Target bucket dst does not exist.");
        assert_eq!(store.calls(StoreOp::List), 0);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_existence_check_can_be_disabled() {
        let store = InMemoryStore::new();
        store.create_bucket("src");
        let connector = InMemoryConnector::new(Arc::clone(&store));
        let policy = SyncPolicy {
            check_bucket_exists: false,
            ..SyncPolicy::default()
        };
        let reconciler = Reconciler::new(Arc::new(connector), Arc::new(policy));

        let outcome = reconciler.reconcile(&pair()).await;
        assert_eq!(outcome.status, OutcomeStatus::NoObjects);
        assert_eq!(store.calls(StoreOp::BucketExists), 0);
    }

    #[tokio::test]
    async fn test_empty_source_reports_no_objects() {
        let store = InMemoryStore::new();
        store.create_bucket("src");
        store.create_bucket("dst");
        let (reconciler, _) = reconciler(&store, false);

        let outcome = reconciler.reconcile(&pair()).await;
        assert_eq!(outcome.status, OutcomeStatus::NoObjects);
        assert_eq!(
            outcome.message(),
            "No objects found for synchronization in source bucket: src"
        );
    }

    #[tokio::test]
    async fn test_listing_failure_is_terminal() {
        let store = InMemoryStore::new();
        store.insert_object("src", "a", b"a", Metadata::new());
        store.create_bucket("dst");
        store.fail(StoreOp::List, "src", None, "connection reset");
        let (reconciler, _) = reconciler(&store, false);

        let outcome = reconciler.reconcile(&pair()).await;
        assert_eq!(
            outcome.message(),
            "Error listing objects in source bucket src: Storage error: connection reset"
        );
        assert_eq!(store.calls(StoreOp::Head), 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_halts_before_any_transfer() {
        let store = InMemoryStore::new();
        for key in ["a", "b", "c"] {
            store.insert_object("src", key, b"x", Metadata::new());
        }
        store.create_bucket("dst");
        store.fail(StoreOp::Head, "src", Some("c"), "forbidden");
        let (reconciler, _) = reconciler(&store, false);

        let outcome = reconciler.reconcile(&pair()).await;
        assert!(matches!(
            outcome.status,
            OutcomeStatus::Failed {
                stage: FailureStage::Metadata { ref key },
                ..
            } if key == "c"
        ));
        assert_eq!(store.calls(StoreOp::Get), 0);
        assert_eq!(store.calls(StoreOp::Put), 0);
        assert!(store.keys("dst").is_empty());
    }

    #[tokio::test]
    async fn test_live_copy_and_mark() {
        let store = InMemoryStore::new();
        store.insert_object("src", "a", b"a", marked());
        store.insert_object("src", "b", b"b", Metadata::new());
        store.insert_object("src", "c", b"c", Metadata::new());
        store.create_bucket("dst");
        let (reconciler, _) = reconciler(&store, false);

        let outcome = reconciler.reconcile(&pair()).await;
        assert_eq!(outcome.copied(), 2);
        assert_eq!(
            outcome.status,
            OutcomeStatus::Completed {
                copied: 2,
                failed: 0,
                already_synced: 1,
                pending: 0
            }
        );
        assert_eq!(store.keys("dst"), vec!["b", "c"]);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_transfer_failure_does_not_stop_siblings() {
        let store = InMemoryStore::new();
        for key in ["a", "b", "c"] {
            store.insert_object("src", key, key.as_bytes(), Metadata::new());
        }
        store.create_bucket("dst");
        store.fail(StoreOp::Get, "src", Some("b"), "checksum mismatch");
        let (reconciler, _) = reconciler(&store, false);

        let outcome = reconciler.reconcile(&pair()).await;
        assert_eq!(outcome.copied(), 3);
        assert!(matches!(
            outcome.status,
            OutcomeStatus::Completed { failed: 1, .. }
        ));
        assert_eq!(store.keys("dst"), vec!["a", "c"]);
        assert!(store.object("src", "b").unwrap().metadata.is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_becomes_outcome() {
        let store = InMemoryStore::new();
        let (reconciler, connector) = reconciler(&store, false);
        connector.refuse("backup");

        let outcome = reconciler.reconcile(&pair()).await;
        assert!(outcome.is_failure());
        assert!(outcome.message().starts_with("Error connecting to target endpoint of pair main"));
        // The source session opened first is released too
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_transfers_respect_concurrency_limit() {
        let store = InMemoryStore::new();
        for i in 0..20 {
            store.insert_object("src", &format!("k{:02}", i), b"x", Metadata::new());
        }
        store.create_bucket("dst");
        store.set_latency(Some(std::time::Duration::from_millis(2)));

        let connector = InMemoryConnector::new(Arc::clone(&store));
        let policy = SyncPolicy {
            max_concurrent_transfers: 4,
            ..SyncPolicy::default()
        };
        let reconciler = Reconciler::new(Arc::new(connector), Arc::new(policy));

        let outcome = reconciler.reconcile(&pair()).await;
        assert_eq!(outcome.copied(), 20);
        assert!(store.max_in_flight() <= 4);
        assert_eq!(store.keys("dst").len(), 20);
    }
}

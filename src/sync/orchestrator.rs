//! Cycle orchestration
//!
//! Runs every pair of one configuration snapshot through the reconciler with
//! bounded parallelism, then reports each outcome to the operator. A pair
//! that panics is reported as aborted; the others are unaffected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::pool::{PoolError, TaskPool};
use super::reconciler::Reconciler;
use crate::error::Result;
use crate::notify::Notifier;
use crate::types::{BucketPair, FailureStage, OutcomeStatus, ReconciliationOutcome};

/// Outcomes of one pass over all pairs, ordered by pair name
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub outcomes: Vec<ReconciliationOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn total_copied(&self) -> usize {
        self.outcomes.iter().map(ReconciliationOutcome::copied).sum()
    }

    pub fn failures(&self) -> Vec<&ReconciliationOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure()).collect()
    }

    pub fn outcome(&self, pair: &str) -> Option<&ReconciliationOutcome> {
        self.outcomes.iter().find(|o| o.pair == pair)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct Orchestrator {
    reconciler: Reconciler,
    notifier: Arc<dyn Notifier>,
    pool: TaskPool,
}

impl Orchestrator {
    pub fn new(reconciler: Reconciler, notifier: Arc<dyn Notifier>) -> Self {
        let pool = TaskPool::new(reconciler.policy().max_concurrent_pairs);
        Self {
            reconciler,
            notifier,
            pool,
        }
    }

    /// Reconcile all pairs and notify one message per outcome
    pub async fn run(&self, pairs: &[BucketPair]) -> CycleReport {
        let started_at = Utc::now();
        let outcomes: Arc<DashMap<String, ReconciliationOutcome>> = Arc::new(DashMap::new());

        let tasks = pairs.iter().cloned().map(|pair| {
            let reconciler = self.reconciler.clone();
            let outcomes = Arc::clone(&outcomes);
            async move {
                let outcome = reconciler.reconcile(&pair).await;
                outcomes.insert(pair.name.clone(), outcome);
            }
        });
        let results = self.pool.run_all(tasks).await;

        let mut ordered: Vec<ReconciliationOutcome> = pairs
            .iter()
            .zip(results)
            .map(|(pair, result)| match outcomes.remove(&pair.name) {
                Some((_, outcome)) => outcome,
                None => self.aborted(pair, result.err(), started_at),
            })
            .collect();
        ordered.sort_by(|a, b| a.pair.cmp(&b.pair));

        for outcome in &ordered {
            if outcome.is_failure() {
                tracing::error!("{}", outcome);
            } else {
                tracing::info!("{}", outcome);
            }
            if let Err(e) = self.notifier.send(&outcome.message()).await {
                tracing::error!(
                    "Failed to send {} notification for pair {}: {}",
                    self.notifier.name(),
                    outcome.pair,
                    e
                );
            }
        }

        CycleReport {
            outcomes: ordered,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn aborted(
        &self,
        pair: &BucketPair,
        error: Option<PoolError>,
        started_at: DateTime<Utc>,
    ) -> ReconciliationOutcome {
        let detail = error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no outcome recorded".to_string());
        ReconciliationOutcome::new(
            pair,
            self.reconciler.policy().dry_run,
            OutcomeStatus::Failed {
                stage: FailureStage::Aborted,
                detail,
            },
            started_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::storage::{InMemoryConnector, InMemoryStore};
    use crate::types::{BucketEndpoint, Metadata, SyncPolicy};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str) -> Result<()> {
            self.messages.lock().push(message.to_string());
            if self.fail {
                return Err(SyncError::Notify("chat not found".to_string()));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

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

    fn pair(name: &str, source: &str, target: &str) -> BucketPair {
        BucketPair {
            name: name.to_string(),
            source: endpoint(&format!("{}-src", name), source),
            target: endpoint(&format!("{}-dst", name), target),
        }
    }

    fn orchestrator(
        store: &Arc<InMemoryStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> (Orchestrator, InMemoryConnector) {
        let connector = InMemoryConnector::new(Arc::clone(store));
        let reconciler = Reconciler::new(
            Arc::new(connector.clone()),
            Arc::new(SyncPolicy::default()),
        );
        (Orchestrator::new(reconciler, notifier), connector)
    }

    #[tokio::test]
    async fn test_one_notification_per_pair_in_name_order() {
        let store = InMemoryStore::new();
        store.insert_object("a-src", "k", b"1", Metadata::new());
        store.create_bucket("a-dst");
        store.create_bucket("b-src");
        store.create_bucket("b-dst");
        let notifier = Arc::new(RecordingNotifier::default());
        let (orchestrator, _) = orchestrator(&store, Arc::clone(&notifier));

        let pairs = vec![pair("b", "b-src", "b-dst"), pair("a", "a-src", "a-dst")];
        let report = orchestrator.run(&pairs).await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].pair, "a");
        assert_eq!(report.total_copied(), 1);
        let messages = notifier.messages.lock().clone();
        assert_eq!(
            messages,
            vec![
                "Synchronization completed for bucket pair: a-src -> a-dst: 1 objects copied."
                    .to_string(),
                "No objects found for synchronization in source bucket: b-src".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_pair_does_not_affect_others() {
        let store = InMemoryStore::new();
        store.insert_object("ok-src", "k", b"1", Metadata::new());
        store.create_bucket("ok-dst");
        let notifier = Arc::new(RecordingNotifier::default());
        let (orchestrator, connector) = orchestrator(&store, notifier);
        connector.refuse("bad-src");

        let pairs = vec![
            pair("bad", "bad-src", "bad-dst"),
            pair("ok", "ok-src", "ok-dst"),
        ];
        let report = orchestrator.run(&pairs).await;

        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.outcome("ok").map(|o| o.copied()), Some(1));
        assert_eq!(store.keys("ok-dst"), vec!["k"]);
    }

    #[tokio::test]
    async fn test_notification_errors_are_swallowed() {
        let store = InMemoryStore::new();
        store.create_bucket("s");
        store.create_bucket("t");
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        });
        let (orchestrator, _) = orchestrator(&store, Arc::clone(&notifier));

        let report = orchestrator.run(&[pair("p", "s", "t")]).await;
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.failures().is_empty());
        assert!(!report.outcomes[0].is_failure());
        assert!(matches!(report.outcomes[0].status, OutcomeStatus::NoObjects));
        assert_eq!(notifier.messages.lock().len(), 1);
    }

    #[test]
    fn test_aborted_outcome_message() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let (orchestrator, _) = orchestrator(&store, notifier);

        let outcome = orchestrator.aborted(
            &pair("p", "s", "t"),
            Some(PoolError::Panicked("boom".to_string())),
            Utc::now(),
        );
        assert_eq!(
            outcome.message(),
            "Reconciliation of pair p aborted: Task panicked: boom"
        );
        assert!(outcome.is_failure());
    }

    #[tokio::test]
    async fn test_report_serializes_outcomes() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let (orchestrator, _) = orchestrator(&store, notifier);

        let report = orchestrator.run(&[pair("p", "s", "t")]).await;
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["outcomes"][0]["pair"], "p");
        assert_eq!(json["outcomes"][0]["status"]["status"], "bucket_missing");
    }
}

//! In-process object store
//!
//! Buckets live in one shared [`InMemoryStore`]; every endpoint connected
//! through [`InMemoryConnector`] sees the same buckets, so a pair is just two
//! bucket names. Faults can be injected per operation, bucket and key, and
//! every call is counted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{ObjectStore, ObjectSummary, StoreConnector};
use crate::error::{Result, SyncError};
use crate::types::{BucketEndpoint, Metadata};

/// Storage operations, for fault injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    BucketExists,
    List,
    Head,
    Get,
    Put,
    CopyReplaceMetadata,
}

/// Object body plus user metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    bucket: String,
    /// `None` matches every key
    key: Option<String>,
    message: String,
}

/// Shared state behind every in-memory session
#[derive(Default)]
pub struct InMemoryStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    faults: RwLock<Vec<Fault>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
    latency: RwLock<Option<Duration>>,
    open_sessions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Insert (or overwrite) an object, creating the bucket if needed
    pub fn insert_object(&self, bucket: &str, key: &str, body: &[u8], metadata: Metadata) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body: body.to_vec(),
                    metadata,
                },
            );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets.read().get(bucket)?.get(key).cloned()
    }

    /// Sorted keys of a bucket (empty if the bucket does not exist)
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make `op` fail for `bucket` (and `key`, when given)
    pub fn fail(&self, op: StoreOp, bucket: &str, key: Option<&str>, message: &str) {
        self.faults.write().push(Fault {
            op,
            bucket: bucket.to_string(),
            key: key.map(String::from),
            message: message.to_string(),
        });
    }

    pub fn clear_faults(&self) {
        self.faults.write().clear();
    }

    /// Delay every operation, to make concurrency observable
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Number of calls made for `op`, including failed ones
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Sessions currently alive
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Highest number of operations observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Open a session labelled with `endpoint`
    pub fn session(self: &Arc<Self>, endpoint: &str) -> InMemorySession {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        InMemorySession {
            store: Arc::clone(self),
            endpoint: endpoint.to_string(),
        }
    }

    async fn begin(&self, op: StoreOp, bucket: &str, key: Option<&str>) -> Result<InFlight<'_>> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight { store: self };

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fault = self
            .faults
            .read()
            .iter()
            .find(|f| {
                f.op == op
                    && f.bucket == bucket
                    && f.key.as_deref().map_or(true, |k| Some(k) == key)
            })
            .map(|f| f.message.clone());

        match fault {
            Some(message) => Err(SyncError::Storage(message)),
            None => Ok(guard),
        }
    }

    fn missing_bucket(bucket: &str) -> SyncError {
        SyncError::BucketNotFound(bucket.to_string())
    }

    fn missing_object(bucket: &str, key: &str) -> SyncError {
        SyncError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

struct InFlight<'a> {
    store: &'a InMemoryStore,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One open session; closing is dropping
pub struct InMemorySession {
    store: Arc<InMemoryStore>,
    endpoint: String,
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.store.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for InMemorySession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let _op = self.store.begin(StoreOp::BucketExists, bucket, None).await?;
        Ok(self.store.buckets.read().contains_key(bucket))
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>> {
        let _op = self.store.begin(StoreOp::List, bucket, None).await?;
        let buckets = self.store.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| InMemoryStore::missing_bucket(bucket))?;

        Ok(objects
            .iter()
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.body.len() as u64,
            })
            .collect())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Metadata> {
        let _op = self.store.begin(StoreOp::Head, bucket, Some(key)).await?;
        self.store
            .object(bucket, key)
            .map(|object| object.metadata)
            .ok_or_else(|| InMemoryStore::missing_object(bucket, key))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let _op = self.store.begin(StoreOp::Get, bucket, Some(key)).await?;
        self.store
            .object(bucket, key)
            .map(|object| object.body)
            .ok_or_else(|| InMemoryStore::missing_object(bucket, key))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let _op = self.store.begin(StoreOp::Put, bucket, Some(key)).await?;
        let mut buckets = self.store.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| InMemoryStore::missing_bucket(bucket))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                metadata: Metadata::new(),
            },
        );
        Ok(())
    }

    async fn copy_object_replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        let _op = self
            .store
            .begin(StoreOp::CopyReplaceMetadata, bucket, Some(key))
            .await?;
        let mut buckets = self.store.buckets.write();
        let object = buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
            .ok_or_else(|| InMemoryStore::missing_object(bucket, key))?;
        object.metadata = metadata.clone();
        Ok(())
    }
}

/// Connector handing out sessions on one shared [`InMemoryStore`]
#[derive(Clone)]
pub struct InMemoryConnector {
    store: Arc<InMemoryStore>,
    refused: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryConnector {
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self {
            store,
            refused: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    /// Refuse connections to the endpoint with this name
    pub fn refuse(&self, endpoint_name: &str) {
        self.refused.write().insert(endpoint_name.to_string());
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn connect(&self, endpoint: &BucketEndpoint) -> Result<Arc<dyn ObjectStore>> {
        if self.refused.read().contains(&endpoint.name) {
            return Err(SyncError::Storage(format!(
                "connection refused by {}",
                endpoint.url()
            )));
        }
        Ok(Arc::new(self.store.session(&endpoint.url())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_metadata_replace() {
        let store = InMemoryStore::new();
        store.create_bucket("dst");
        let session = store.session("mem://a");

        session
            .put_object("dst", "k", b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(session.get_object("dst", "k").await.unwrap(), b"hello");

        let mut metadata = Metadata::new();
        metadata.insert("synced".to_string(), "1".to_string());
        session
            .copy_object_replace_metadata("dst", "k", &metadata)
            .await
            .unwrap();
        assert_eq!(session.head_object("dst", "k").await.unwrap(), metadata);
        assert_eq!(store.calls(StoreOp::Put), 1);
    }

    #[tokio::test]
    async fn test_missing_bucket_and_object() {
        let store = InMemoryStore::new();
        let session = store.session("mem://a");

        assert!(!session.bucket_exists("nope").await.unwrap());
        assert!(matches!(
            session.list_objects("nope").await,
            Err(SyncError::BucketNotFound(_))
        ));
        assert!(session.put_object("nope", "k", vec![]).await.is_err());

        store.create_bucket("b");
        assert!(matches!(
            session.head_object("b", "k").await,
            Err(SyncError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_fault_injection_by_key() {
        let store = InMemoryStore::new();
        store.insert_object("b", "good", b"1", Metadata::new());
        store.insert_object("b", "bad", b"2", Metadata::new());
        store.fail(StoreOp::Head, "b", Some("bad"), "boom");
        let session = store.session("mem://a");

        assert!(session.head_object("b", "good").await.is_ok());
        let err = session.head_object("b", "bad").await.unwrap_err();
        assert_eq!(err.to_string(), "Storage error: boom");
        assert_eq!(store.calls(StoreOp::Head), 2);

        store.clear_faults();
        assert!(session.head_object("b", "bad").await.is_ok());
    }

    #[tokio::test]
    async fn test_sessions_are_counted() {
        let store = InMemoryStore::new();
        let connector = InMemoryConnector::new(Arc::clone(&store));
        let endpoint = BucketEndpoint {
            name: "e".to_string(),
            bucket: "b".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint_url: "mem://local".to_string(),
            port: 1,
            enabled: true,
            region: String::new(),
            managed_mark: true,
        };

        let session = connector.connect(&endpoint).await.unwrap();
        assert_eq!(store.open_sessions(), 1);
        assert_eq!(session.endpoint(), "mem://local:1");
        drop(session);
        assert_eq!(store.open_sessions(), 0);

        connector.refuse("e");
        assert!(connector.connect(&endpoint).await.is_err());
        assert_eq!(store.open_sessions(), 0);
    }
}

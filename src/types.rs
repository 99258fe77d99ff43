//! Core types for Marksync

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User metadata attached to an object (key -> value)
pub type Metadata = HashMap<String, String>;

/// Default metadata key used to mark propagated objects
pub const DEFAULT_METADATA_KEY: &str = "synced-to-backup";
/// Default metadata value used to mark propagated objects
pub const DEFAULT_METADATA_VALUE: &str = "1";
/// Default region for S3-compatible endpoints that ignore it
pub const DEFAULT_REGION: &str = "us-east-1";
/// Default upper bound on pairs reconciled at the same time
pub const DEFAULT_MAX_CONCURRENT_PAIRS: usize = 8;
/// Default upper bound on in-flight transfers within one pair
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 16;
/// Default Telegram Bot API base URL
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// One side of a bucket pair and how to reach it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEndpoint {
    /// Human-readable endpoint name
    pub name: String,
    /// Bucket name on the endpoint
    pub bucket: String,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    /// Base URL without port (e.g. `http://minio.local`)
    pub endpoint_url: String,
    pub port: u16,
    /// Disabled endpoints exclude their whole pair
    pub enabled: bool,
    pub region: String,
    /// Whether marker backfill may touch this endpoint
    pub managed_mark: bool,
}

impl BucketEndpoint {
    /// Connection URL in `<endpoint-url>:<port>` form
    pub fn url(&self) -> String {
        format!("{}:{}", self.endpoint_url.trim_end_matches('/'), self.port)
    }
}

impl fmt::Debug for BucketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketEndpoint")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .field("port", &self.port)
            .field("enabled", &self.enabled)
            .field("region", &self.region)
            .field("managed_mark", &self.managed_mark)
            .finish()
    }
}

/// A configured (source, target) tuple kept synchronized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketPair {
    pub name: String,
    pub source: BucketEndpoint,
    pub target: BucketEndpoint,
}

impl BucketPair {
    /// A pair is active only when both endpoints are enabled
    pub fn is_enabled(&self) -> bool {
        self.source.enabled && self.target.enabled
    }

    /// `source-bucket -> target-bucket`
    pub fn describe(&self) -> String {
        format!("{} -> {}", self.source.bucket, self.target.bucket)
    }
}

/// Metadata key/value recording that a source object has been propagated.
///
/// The key is stored lowercased: S3-compatible stores hand user metadata
/// keys back in lowercase, so a mixed-case key would never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    key: String,
    value: String,
}

impl Marker {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into().trim().to_ascii_lowercase(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Current marker value carried by `metadata`, if any
    pub fn read<'a>(&self, metadata: &'a Metadata) -> Option<&'a str> {
        metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&self.key))
            .map(|(_, v)| v.as_str())
    }

    /// True iff `metadata` carries exactly this marker value
    pub fn is_set_on(&self, metadata: &Metadata) -> bool {
        self.read(metadata) == Some(self.value.as_str())
    }

    /// Existing metadata with the marker entry set.
    ///
    /// Every other user metadata entry is carried over: the marker write
    /// replaces the object's metadata wholesale, so anything not copied here
    /// would be erased from the source object.
    pub fn apply(&self, metadata: &Metadata) -> Metadata {
        let mut marked: Metadata = metadata
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case(&self.key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        marked.insert(self.key.clone(), self.value.clone());
        marked
    }
}

impl Default for Marker {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_KEY, DEFAULT_METADATA_VALUE)
    }
}

/// Global synchronization policy applied to every pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub marker: Marker,
    pub check_bucket_exists: bool,
    /// Compute and log the plan without mutating I/O
    pub dry_run: bool,
    /// Sleep between cycles
    pub interval: Duration,
    pub max_concurrent_pairs: usize,
    pub max_concurrent_transfers: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            marker: Marker::default(),
            check_bucket_exists: true,
            dry_run: false,
            interval: Duration::from_secs(300),
            max_concurrent_pairs: DEFAULT_MAX_CONCURRENT_PAIRS,
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
        }
    }
}

/// Operator notification channel settings
#[derive(Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub enabled: bool,
    pub api_url: String,
}

impl NotifyConfig {
    /// Enabled and fully specified
    pub fn is_active(&self) -> bool {
        self.enabled && self.bot_token.is_some() && self.chat_id.is_some()
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            enabled: false,
            api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
        }
    }
}

impl fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .field("enabled", &self.enabled)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Transient per-pass view of one object; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    pub in_source: bool,
    /// `None` when the target was not listed during this pass
    pub in_target: Option<bool>,
    /// Value of the marker key on the source object
    pub marker_value: Option<String>,
    /// Full user metadata of the source object
    pub metadata: Metadata,
}

impl ObjectRecord {
    pub fn from_source(key: impl Into<String>, metadata: Metadata, marker: &Marker) -> Self {
        let marker_value = marker.read(&metadata).map(String::from);
        Self {
            key: key.into(),
            in_source: true,
            in_target: None,
            marker_value,
            metadata,
        }
    }

    /// The marker, and only the marker, decides whether an object is synced
    pub fn is_synchronized(&self, marker: &Marker) -> bool {
        self.marker_value.as_deref() == Some(marker.value())
    }
}

/// Which side of a pair an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Target => "target",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Side::Source => "Source",
            Side::Target => "Target",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a pair reconciliation stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum FailureStage {
    Connect { side: Side },
    ExistenceCheck { side: Side, bucket: String },
    Listing,
    Metadata { key: String },
    /// The reconciliation task itself died
    Aborted,
}

/// Terminal state of one pair reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// One of the endpoints is disabled
    Skipped,
    /// Bucket existence check returned false
    BucketMissing { side: Side, bucket: String },
    Failed { stage: FailureStage, detail: String },
    /// The source bucket is empty
    NoObjects,
    Completed {
        /// Transfers scheduled in live mode
        copied: usize,
        /// Scheduled transfers whose copy or marker step failed
        failed: usize,
        already_synced: usize,
        /// Objects a dry run would have copied
        pending: usize,
    },
}

/// Result of reconciling one pair in one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub pair: String,
    pub source_bucket: String,
    pub target_bucket: String,
    pub dry_run: bool,
    pub status: OutcomeStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationOutcome {
    pub fn new(
        pair: &BucketPair,
        dry_run: bool,
        status: OutcomeStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pair: pair.name.clone(),
            source_bucket: pair.source.bucket.clone(),
            target_bucket: pair.target.bucket.clone(),
            dry_run,
            status,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Number of transfers scheduled (always 0 for dry runs)
    pub fn copied(&self) -> usize {
        match self.status {
            OutcomeStatus::Completed { copied, .. } => copied,
            _ => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Failed { .. } | OutcomeStatus::BucketMissing { .. }
        )
    }

    /// One-line operator summary
    pub fn message(&self) -> String {
        match &self.status {
            OutcomeStatus::Skipped => format!(
                "Skipping pair {}: {} -> {} is disabled.",
                self.pair, self.source_bucket, self.target_bucket
            ),
            OutcomeStatus::BucketMissing { side, bucket } => {
                format!("{} bucket {} does not exist.", side.title(), bucket)
            }
            OutcomeStatus::Failed { stage, detail } => match stage {
                FailureStage::Connect { side } => format!(
                    "Error connecting to {} endpoint of pair {}: {}",
                    side, self.pair, detail
                ),
                FailureStage::ExistenceCheck { side, bucket } => {
                    format!("Error checking {} bucket {}: {}", side, bucket, detail)
                }
                FailureStage::Listing => format!(
                    "Error listing objects in source bucket {}: {}",
                    self.source_bucket, detail
                ),
                FailureStage::Metadata { key } => format!(
                    "Error getting metadata for {} in source bucket {}: {}",
                    key, self.source_bucket, detail
                ),
                FailureStage::Aborted => {
                    format!("Reconciliation of pair {} aborted: {}", self.pair, detail)
                }
            },
            OutcomeStatus::NoObjects => format!(
                "No objects found for synchronization in source bucket: {}",
                self.source_bucket
            ),
            OutcomeStatus::Completed {
                copied,
                failed,
                pending,
                ..
            } => {
                let mut message = format!(
                    "Synchronization completed for bucket pair: {} -> {}: {} objects copied.",
                    self.source_bucket, self.target_bucket, copied
                );
                if self.dry_run {
                    message.push_str(&format!(" (dry run: {} objects pending)", pending));
                }
                if *failed > 0 {
                    message.push_str(&format!(" ({} transfers failed)", failed));
                }
                message
            }
        }
    }
}

impl fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

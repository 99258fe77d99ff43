//! Configuration loading
//!
//! The YAML file is parsed into loosely-typed raw structs first, so that a
//! single malformed pair can be dropped by the validator instead of failing
//! the whole load. Everything downstream works on an immutable
//! [`ConfigSnapshot`] that is swapped wholesale on reload.

mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};

pub use validate::{validate_pairs, PairRejection, RejectionReason, ValidationReport};

use crate::error::{Result, SyncError};
use crate::types::{
    BucketPair, Marker, NotifyConfig, SyncPolicy, DEFAULT_MAX_CONCURRENT_PAIRS,
    DEFAULT_MAX_CONCURRENT_TRANSFERS, DEFAULT_METADATA_KEY, DEFAULT_METADATA_VALUE,
    DEFAULT_TELEGRAM_API_URL,
};

/// Default configuration file name
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Scalar that YAML authors write either quoted or bare (`port: 9000`,
/// `port: "9000"`, `metadata_value: 1`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Integer(i64),
    Bool(bool),
    Float(f64),
    Text(String),
}

impl RawScalar {
    pub fn into_string(self) -> String {
        match self {
            RawScalar::Integer(n) => n.to_string(),
            RawScalar::Bool(b) => b.to_string(),
            RawScalar::Float(f) => f.to_string(),
            RawScalar::Text(s) => s,
        }
    }
}

/// Accept any scalar where a string is expected (`access-key: 12345`)
fn scalar_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawScalar>::deserialize(deserializer)?.map(RawScalar::into_string))
}

impl fmt::Display for RawScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clone().into_string())
    }
}

/// Endpoint as written in the file; every field may be absent
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawEndpoint {
    #[serde(default, deserialize_with = "scalar_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub bucket_name: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub access_key: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub secret_key: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub endpoint_url: Option<String>,
    pub port: Option<RawScalar>,
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub region: Option<String>,
    #[serde(rename = "managed_s3_mark", alias = "managed-s3-mark")]
    pub managed_s3_mark: Option<bool>,
}

impl fmt::Debug for RawEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawEndpoint")
            .field("name", &self.name)
            .field("bucket_name", &self.bucket_name)
            .field("endpoint_url", &self.endpoint_url)
            .field("port", &self.port)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// One list entry under a pair; anything that is not an endpoint mapping
/// is kept as-is for the validator to reject
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
    Endpoint(RawEndpoint),
    Malformed(serde_yaml::Value),
}

/// A pair's value as written: normally a list of endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPair {
    Endpoints(Vec<RawEntry>),
    Malformed(serde_yaml::Value),
}

impl From<Vec<RawEndpoint>> for RawPair {
    fn from(endpoints: Vec<RawEndpoint>) -> Self {
        RawPair::Endpoints(endpoints.into_iter().map(RawEntry::Endpoint).collect())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBuckets {
    pub pair: Option<BTreeMap<String, RawPair>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSync {
    /// Seconds between cycles
    pub interval: Option<u64>,
    pub metadata_key: Option<String>,
    pub metadata_value: Option<RawScalar>,
    pub check_bucket_exists: Option<bool>,
    pub max_concurrent_pairs: Option<usize>,
    pub max_concurrent_transfers: Option<usize>,
}

#[derive(Clone, Default, Deserialize)]
pub struct RawNotify {
    pub bot_token: Option<String>,
    pub chat_id: Option<RawScalar>,
    pub enabled: Option<bool>,
    pub api_url: Option<String>,
}

impl fmt::Debug for RawNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawNotify")
            .field("chat_id", &self.chat_id)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// The file as parsed, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub buckets: Option<RawBuckets>,
    pub sync: Option<RawSync>,
    #[serde(alias = "telegram")]
    pub notify: Option<RawNotify>,
}

impl RawConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Immutable, validated view of one version of the configuration file
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// SHA-256 of the file contents this snapshot was built from
    pub fingerprint: String,
    pub policy: SyncPolicy,
    pub notify: NotifyConfig,
    /// Valid, enabled pairs
    pub pairs: Vec<BucketPair>,
    /// Pairs dropped by the validator
    pub rejected: Vec<PairRejection>,
    pub loaded_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            SyncError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| SyncError::Config(format!("Configuration is not UTF-8: {}", e)))?;
        let raw = RawConfig::from_yaml(text)?;
        Self::from_raw(raw, fingerprint(bytes))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::from_bytes(text.as_bytes())
    }

    fn from_raw(raw: RawConfig, fingerprint: String) -> Result<Self> {
        let pairs = raw
            .buckets
            .and_then(|b| b.pair)
            .ok_or_else(|| {
                SyncError::Config("Configuration must contain 'buckets' and 'pair' keys".to_string())
            })?;

        let policy = parse_policy(raw.sync)?;
        let notify = raw.notify.map(parse_notify).unwrap_or_default();
        let report = validate_pairs(&pairs);

        Ok(Self {
            fingerprint,
            policy,
            notify,
            pairs: report.pairs,
            rejected: report.rejected,
            loaded_at: Utc::now(),
        })
    }

    /// Apply the process-wide `--dry-run` flag
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.policy.dry_run = dry_run;
        self
    }

    /// `source -> target` line per valid pair
    pub fn summary(&self) -> Vec<String> {
        self.pairs
            .iter()
            .map(|p| format!("{}: {}", p.name, p.describe()))
            .collect()
    }

    /// All valid pairs, or only the named one
    pub fn select(&self, name: Option<&str>) -> Result<Vec<BucketPair>> {
        let Some(name) = name else {
            return Ok(self.pairs.clone());
        };

        if let Some(pair) = self.pairs.iter().find(|p| p.name == name) {
            return Ok(vec![pair.clone()]);
        }
        match self.rejected.iter().find(|r| r.pair == name) {
            Some(rejection) => Err(SyncError::InvalidPair(rejection.to_string())),
            None => Err(SyncError::InvalidPair(format!(
                "Bucket pair {} is not configured",
                name
            ))),
        }
    }
}

fn parse_policy(raw: Option<RawSync>) -> Result<SyncPolicy> {
    let raw = raw.ok_or_else(|| {
        SyncError::Config("Configuration must contain a 'sync' section".to_string())
    })?;

    let interval = raw
        .interval
        .ok_or_else(|| SyncError::Config("'sync.interval' is required".to_string()))?;
    if interval == 0 {
        return Err(SyncError::Config(
            "'sync.interval' must be greater than zero".to_string(),
        ));
    }

    let max_concurrent_pairs = raw
        .max_concurrent_pairs
        .unwrap_or(DEFAULT_MAX_CONCURRENT_PAIRS);
    let max_concurrent_transfers = raw
        .max_concurrent_transfers
        .unwrap_or(DEFAULT_MAX_CONCURRENT_TRANSFERS);
    if max_concurrent_pairs == 0 || max_concurrent_transfers == 0 {
        return Err(SyncError::Config(
            "Concurrency limits must be greater than zero".to_string(),
        ));
    }

    let key = raw
        .metadata_key
        .unwrap_or_else(|| DEFAULT_METADATA_KEY.to_string());
    if key.trim().is_empty() {
        return Err(SyncError::Config("'sync.metadata_key' is empty".to_string()));
    }
    let value = raw
        .metadata_value
        .map(RawScalar::into_string)
        .unwrap_or_else(|| DEFAULT_METADATA_VALUE.to_string());

    Ok(SyncPolicy {
        marker: Marker::new(key, value),
        check_bucket_exists: raw.check_bucket_exists.unwrap_or(true),
        dry_run: false,
        interval: Duration::from_secs(interval),
        max_concurrent_pairs,
        max_concurrent_transfers,
    })
}

fn parse_notify(raw: RawNotify) -> NotifyConfig {
    NotifyConfig {
        bot_token: raw.bot_token.filter(|t| !t.trim().is_empty()),
        chat_id: raw.chat_id.map(RawScalar::into_string),
        enabled: raw.enabled.unwrap_or(true),
        api_url: raw
            .api_url
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
    }
}

/// Hex-encoded SHA-256 of the configuration bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fingerprint the file at `path`
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(fingerprint(&bytes))
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

/// Best-effort read of only the notify section, for reporting a
/// configuration that fails to load as a whole
pub fn read_notify_lenient(path: &Path) -> Option<NotifyConfig> {
    let text = std::fs::read_to_string(path).ok()?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text).ok()?;
    let section = value.get("notify").or_else(|| value.get("telegram"))?;
    let raw: RawNotify = serde_yaml::from_value(section.clone()).ok()?;
    Some(parse_notify(raw)).filter(NotifyConfig::is_active)
}

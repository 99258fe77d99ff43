//! Pair validation
//!
//! Filters the configured pair map down to structurally valid, enabled
//! pairs. Rejections are logged and reported, never raised.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use serde_yaml::Value;

use super::{RawEndpoint, RawEntry, RawPair, RawScalar};
use crate::types::{BucketEndpoint, BucketPair, DEFAULT_REGION};

/// Why a configured pair was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// A pair needs exactly two endpoints
    EndpointCount { found: usize },
    Disabled { endpoint: String },
    MissingFields {
        endpoint: String,
        fields: Vec<&'static str>,
    },
    InvalidPort { endpoint: String, value: String },
    /// The pair or one of its entries has the wrong YAML shape
    Malformed { detail: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::EndpointCount { found } => {
                write!(f, "must contain exactly two buckets, found {}", found)
            }
            RejectionReason::Disabled { endpoint } => {
                write!(f, "endpoint {} is disabled", endpoint)
            }
            RejectionReason::MissingFields { endpoint, fields } => write!(
                f,
                "endpoint {} is missing required fields: {}",
                endpoint,
                fields.join(", ")
            ),
            RejectionReason::InvalidPort { endpoint, value } => {
                write!(f, "endpoint {} has invalid port {:?}", endpoint, value)
            }
            RejectionReason::Malformed { detail } => write!(f, "is malformed: {}", detail),
        }
    }
}

/// A dropped pair and the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairRejection {
    pub pair: String,
    pub reason: RejectionReason,
}

impl fmt::Display for PairRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bucket pair {} {}", self.pair, self.reason)
    }
}

/// Output of [`validate_pairs`]
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub pairs: Vec<BucketPair>,
    pub rejected: Vec<PairRejection>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Keep the pairs that have two complete, enabled endpoints
pub fn validate_pairs(raw: &BTreeMap<String, RawPair>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (name, endpoints) in raw {
        match validate_pair(name, endpoints) {
            Ok(pair) => report.pairs.push(pair),
            Err(reason) => {
                let rejection = PairRejection {
                    pair: name.clone(),
                    reason,
                };
                tracing::warn!("Skipping invalid pair: {}", rejection);
                report.rejected.push(rejection);
            }
        }
    }

    if report.pairs.is_empty() {
        tracing::warn!(
            "No valid bucket pairs found ({} configured)",
            report.rejected.len()
        );
    } else {
        tracing::info!(
            "Bucket pairs validated: {} valid, {} rejected",
            report.pairs.len(),
            report.rejected.len()
        );
    }

    report
}

fn validate_pair(name: &str, raw: &RawPair) -> Result<BucketPair, RejectionReason> {
    let entries = match raw {
        RawPair::Endpoints(entries) => entries,
        RawPair::Malformed(Value::Null) => {
            return Err(RejectionReason::EndpointCount { found: 0 });
        }
        RawPair::Malformed(other) => {
            return Err(RejectionReason::Malformed {
                detail: format!("expected a list of two buckets, found {}", shape(other)),
            });
        }
    };
    let [source, target] = entries.as_slice() else {
        return Err(RejectionReason::EndpointCount {
            found: entries.len(),
        });
    };
    let source = endpoint_entry(source, 0)?;
    let target = endpoint_entry(target, 1)?;

    for (index, endpoint) in [source, target].into_iter().enumerate() {
        if endpoint.enabled == Some(false) {
            return Err(RejectionReason::Disabled {
                endpoint: label(endpoint, index),
            });
        }
    }

    Ok(BucketPair {
        name: name.to_string(),
        source: build_endpoint(source, 0)?,
        target: build_endpoint(target, 1)?,
    })
}

fn endpoint_entry(entry: &RawEntry, index: usize) -> Result<&RawEndpoint, RejectionReason> {
    match entry {
        RawEntry::Endpoint(endpoint) => Ok(endpoint),
        RawEntry::Malformed(value) => {
            let cause = match serde_yaml::from_value::<RawEndpoint>(value.clone()) {
                Err(e) => e.to_string(),
                Ok(_) => format!("expected a bucket mapping, found {}", shape(value)),
            };
            Err(RejectionReason::Malformed {
                detail: format!("bucket #{}: {}", index + 1, cause),
            })
        }
    }
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Endpoint name for messages, falling back to its position
fn label(endpoint: &RawEndpoint, index: usize) -> String {
    present(&endpoint.name)
        .map(String::from)
        .unwrap_or_else(|| format!("#{}", index + 1))
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn build_endpoint(raw: &RawEndpoint, index: usize) -> Result<BucketEndpoint, RejectionReason> {
    let mut missing = Vec::new();
    let mut require = |field: &Option<String>, key: &'static str| {
        let value = present(field).map(String::from);
        if value.is_none() {
            missing.push(key);
        }
        value
    };

    let name = require(&raw.name, "name");
    let access_key = require(&raw.access_key, "access-key");
    let secret_key = require(&raw.secret_key, "secret-key");
    let endpoint_url = require(&raw.endpoint_url, "endpoint-url");
    let bucket = require(&raw.bucket_name, "bucket-name");
    if raw.port.is_none() {
        missing.push("port");
    }

    let (Some(name), Some(access_key), Some(secret_key), Some(endpoint_url), Some(bucket), Some(port)) =
        (name, access_key, secret_key, endpoint_url, bucket, raw.port.clone())
    else {
        return Err(RejectionReason::MissingFields {
            endpoint: label(raw, index),
            fields: missing,
        });
    };

    let port = parse_port(&port).ok_or_else(|| RejectionReason::InvalidPort {
        endpoint: name.clone(),
        value: port.to_string(),
    })?;

    Ok(BucketEndpoint {
        name,
        bucket,
        access_key,
        secret_key,
        endpoint_url,
        port,
        enabled: true,
        region: present(&raw.region)
            .unwrap_or(DEFAULT_REGION)
            .to_string(),
        managed_mark: raw.managed_s3_mark.unwrap_or(true),
    })
}

fn parse_port(port: &RawScalar) -> Option<u16> {
    let parsed = match port {
        RawScalar::Integer(n) => u16::try_from(*n).ok(),
        RawScalar::Text(s) => s.trim().parse::<u16>().ok(),
        RawScalar::Bool(_) | RawScalar::Float(_) => None,
    };
    parsed.filter(|p| *p != 0)
}

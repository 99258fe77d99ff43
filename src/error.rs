//! Error types for Marksync

use thiserror::Error;

/// Result type alias for Marksync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for Marksync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid bucket pair: {0}")]
    InvalidPair(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "telegram")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "telegram"))]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Check if error is retryable
    ///
    /// Nothing in the sync path retries on its own; this only classifies the
    /// failure for log output.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_) | SyncError::Http(_) | SyncError::Notify(_)
        )
    }

    /// Errors that must stop the watch loop instead of being folded into a
    /// per-pair outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_) | SyncError::Yaml(_) | SyncError::Io(_)
        )
    }
}

//! Marksync - S3 bucket pair reconciliation
//!
//! Copies objects from a source bucket to a target bucket for every
//! configured pair and records each copy as a metadata marker on the source
//! object, so the next cycle only moves what is new.

pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod storage;
pub mod sync;
pub mod types;
pub mod watch;

pub use error::{Result, SyncError};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

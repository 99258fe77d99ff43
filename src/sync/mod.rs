//! Bucket pair synchronization
//!
//! Bottom-up: [`pool`] bounds concurrency, [`plan`] reads source markers,
//! [`transfer`] copies and marks one object, [`reconciler`] handles one pair,
//! [`orchestrator`] runs a whole cycle. [`backfill`] marks objects that are
//! already mirrored.

pub mod backfill;
pub mod orchestrator;
pub mod plan;
pub mod pool;
pub mod reconciler;
pub mod transfer;

pub use backfill::{backfill_all, backfill_pair, BackfillReport};
pub use orchestrator::{CycleReport, Orchestrator};
pub use plan::{snapshot_source, MetadataFailure, SyncPlan};
pub use pool::{PoolError, TaskPool};
pub use reconciler::Reconciler;
pub use transfer::{TransferJob, TransferResult};

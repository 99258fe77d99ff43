//! Bounded task pool
//!
//! Runs a batch of futures as spawned tokio tasks with at most `limit` of
//! them in flight, and waits for all of them. Used at two levels: pairs
//! within a cycle, and transfers within a pair.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Task pool errors
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Task was cancelled")]
    Cancelled,
}

/// Spawns batches of tasks with a concurrency bound
#[derive(Debug, Clone)]
pub struct TaskPool {
    limit: usize,
}

impl TaskPool {
    /// A limit of zero is treated as one
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run every task and return their results in submission order.
    ///
    /// A task that panics yields `Err(PoolError::Panicked)` in its slot;
    /// siblings are unaffected.
    pub async fn run_all<I, F, T>(&self, tasks: I) -> Vec<Result<T, PoolError>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut handles: Vec<JoinHandle<T>> = Vec::new();

        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquiring only waits
                let _permit = semaphore.acquire_owned().await;
                task.await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.map_err(|e| {
                if e.is_panic() {
                    PoolError::Panicked(panic_message(e.into_panic()))
                } else {
                    PoolError::Cancelled
                }
            }));
        }

        results
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

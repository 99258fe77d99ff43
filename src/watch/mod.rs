//! Config watch loop
//!
//! Before every cycle the configuration file is fingerprinted; a changed
//! fingerprint reloads and re-validates it. One cycle runs to completion
//! before the loop sleeps for the configured interval. Any error that
//! escapes a cycle is reported once and ends the loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Instrument;

use crate::config::{fingerprint, read_notify_lenient, ConfigSnapshot};
use crate::error::{Result, SyncError};
use crate::notify::{notifier_from_config, DisabledNotifier, Notifier};
use crate::storage::StoreConnector;
use crate::sync::{CycleReport, Orchestrator, Reconciler};

/// What the daemon is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    CycleRunning,
}

/// Result of checking the configuration file before a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Unchanged,
    Reloaded,
}

/// Tracks the configuration file and the snapshot built from it
pub struct ConfigWatcher {
    path: PathBuf,
    dry_run: bool,
    snapshot: Option<Arc<ConfigSnapshot>>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            path: path.into(),
            dry_run,
            snapshot: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Option<&Arc<ConfigSnapshot>> {
        self.snapshot.as_ref()
    }

    /// Reload when the file content changed since the last load
    pub fn refresh(&mut self) -> Result<Refresh> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            SyncError::Config(format!("Cannot read {}: {}", self.path.display(), e))
        })?;

        let current = fingerprint(&bytes);
        if let Some(snapshot) = &self.snapshot {
            if snapshot.fingerprint == current {
                return Ok(Refresh::Unchanged);
            }
        }

        let snapshot = ConfigSnapshot::from_bytes(&bytes)?.with_dry_run(self.dry_run);
        tracing::info!(
            "Loaded configuration {} ({} valid pairs, {} rejected, interval {}s)",
            self.path.display(),
            snapshot.pairs.len(),
            snapshot.rejected.len(),
            snapshot.policy.interval.as_secs()
        );
        for line in snapshot.summary() {
            tracing::info!("Pair {}", line);
        }

        self.snapshot = Some(Arc::new(snapshot));
        Ok(Refresh::Reloaded)
    }
}

/// The long-running sync process
pub struct SyncDaemon {
    watcher: ConfigWatcher,
    connector: Arc<dyn StoreConnector>,
    notifier_override: Option<Arc<dyn Notifier>>,
    notifier: Arc<dyn Notifier>,
    state: CycleState,
    cycles: u64,
}

impl SyncDaemon {
    pub fn new(path: impl Into<PathBuf>, connector: Arc<dyn StoreConnector>, dry_run: bool) -> Self {
        Self {
            watcher: ConfigWatcher::new(path, dry_run),
            connector,
            notifier_override: None,
            notifier: Arc::new(DisabledNotifier),
            state: CycleState::Idle,
            cycles: 0,
        }
    }

    /// Use this notifier instead of the one the configuration describes
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Arc::clone(&notifier);
        self.notifier_override = Some(notifier);
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn snapshot(&self) -> Option<&Arc<ConfigSnapshot>> {
        self.watcher.snapshot()
    }

    /// Refresh the configuration and reconcile every valid pair once
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        if self.watcher.refresh()? == Refresh::Reloaded && self.notifier_override.is_none() {
            if let Some(snapshot) = self.watcher.snapshot() {
                self.notifier = notifier_from_config(&snapshot.notify);
            }
        }

        let snapshot = self
            .watcher
            .snapshot()
            .cloned()
            .ok_or_else(|| SyncError::Internal("No configuration loaded".to_string()))?;

        self.cycles += 1;
        self.state = CycleState::CycleRunning;

        let reconciler = Reconciler::new(
            Arc::clone(&self.connector),
            Arc::new(snapshot.policy.clone()),
        );
        let orchestrator = Orchestrator::new(reconciler, Arc::clone(&self.notifier));
        let span = tracing::info_span!("cycle", cycle = self.cycles);
        let report = orchestrator.run(&snapshot.pairs).instrument(span).await;

        self.state = CycleState::Idle;
        tracing::info!(
            "Cycle {} finished: {} pairs, {} objects copied, {} failures",
            self.cycles,
            report.outcomes.len(),
            report.total_copied(),
            report.failures().len()
        );
        Ok(report)
    }

    /// Run cycles until one fails; the failure is reported and returned
    pub async fn run_forever(&mut self) -> Result<()> {
        loop {
            if let Err(e) = self.run_cycle().await {
                self.report_fatal(&e).await;
                return Err(e);
            }

            let interval = self
                .watcher
                .snapshot()
                .map(|s| s.policy.interval)
                .unwrap_or_default();
            tracing::debug!("Sleeping {}s until next cycle", interval.as_secs());
            tokio::time::sleep(interval).await;
        }
    }

    /// Send `Error: <e>` through whatever channel is reachable
    pub async fn report_fatal(&mut self, error: &SyncError) {
        self.state = CycleState::Idle;
        tracing::error!("Error: {}", error);

        let notifier = match &self.notifier_override {
            Some(notifier) => Arc::clone(notifier),
            None => match read_notify_lenient(self.watcher.path()) {
                Some(config) => notifier_from_config(&config),
                None => Arc::clone(&self.notifier),
            },
        };

        if let Err(e) = notifier.send(&format!("Error: {}", error)).await {
            tracing::error!("Failed to report fatal error via {}: {}", notifier.name(), e);
        }
    }
}

//! Periodic trigger for sync runs.
//!
//! Runs execute one after another on a fixed interval. A tick that falls due
//! while a run is still going is skipped rather than queued, and shutdown is
//! only observed between runs so a run is never cut off halfway through.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{BlobStore, OrderSource};
use crate::domain::{RunOutcome, RunReport};

use super::lock::RunLock;
use super::orchestrator::SyncOrchestrator;

/// Default time between runs
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Triggers an orchestrator on a fixed interval
pub struct Scheduler<S, O> {
    orchestrator: SyncOrchestrator<S, O>,
    interval: Duration,
    lock_path: Option<PathBuf>,
}

impl<S, O> Scheduler<S, O>
where
    S: BlobStore,
    O: OrderSource,
{
    pub fn new(orchestrator: SyncOrchestrator<S, O>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            lock_path: None,
        }
    }

    /// Guard every run with an exclusive lock on `path`
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<S, O> {
        &self.orchestrator
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run once now, unless another process holds the run lock
    pub async fn trigger(&self) -> Result<RunReport> {
        let _lock = match &self.lock_path {
            Some(path) => match RunLock::try_acquire(path)? {
                Some(lock) => Some(lock),
                None => {
                    warn!(lock = %path.display(), "Another sync run holds the lock, skipping");
                    let now = Utc::now();
                    return Ok(RunReport {
                        run_id: Uuid::new_v4(),
                        started_at: now,
                        finished_at: now,
                        outcome: RunOutcome::Skipped,
                    });
                }
            },
            None => None,
        };

        Ok(self.orchestrator.run(Utc::now()).await)
    }

    /// Trigger runs until `shutdown` resolves. Returns the number of runs triggered.
    ///
    /// The first run starts immediately.
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        let mut triggered = 0u64;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(runs = triggered, "Scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    triggered += 1;
                    match self.trigger().await {
                        Ok(report) if report.is_failure() => {
                            warn!(run_id = %report.run_id, "Run failed, retrying at next tick");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Could not start sync run"),
                    }
                }
            }
        }

        triggered
    }
}

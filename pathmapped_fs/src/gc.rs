//! Reclaim sweeper.
//!
//! Drains the reclaim queue in batches: every entry older than the grace
//! period has its blob deleted from the physical store and is then removed
//! from the queue. Entries whose deletion fails stay queued for a later run.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pathmapped_core::{PathDb, PathMapResult, PhysicalStore, ReclaimEntry, StorageConfig};

/// Summary of one sweeper run.
#[derive(Debug, Default)]
pub struct GcReport {
    /// Reclaim entries looked at in this run.
    pub examined: usize,
    /// Blobs deleted and dequeued.
    pub deleted: usize,
    /// Entries left queued because deletion or dequeue failed.
    pub failed: usize,
    /// Number of batches fetched.
    pub batches: usize,
    /// Errors encountered while processing entries.
    pub errors: Vec<(ReclaimEntry, anyhow::Error)>,
}

#[derive(Debug)]
pub struct Sweeper {
    db: Arc<dyn PathDb>,
    store: Arc<dyn PhysicalStore>,
    grace_period: chrono::Duration,
    batch_size: usize,
    max_result_size: usize,
    /// One run at a time.
    running: Mutex<()>,
}

impl Sweeper {
    pub fn new(
        db: Arc<dyn PathDb>,
        store: Arc<dyn PhysicalStore>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            db,
            store,
            grace_period: config.gc_grace_period(),
            batch_size: config.gc_batch_size,
            max_result_size: config.gc_max_result_size,
            running: Mutex::new(()),
        }
    }

    /// Runs one sweep.
    ///
    /// Stops when a batch comes back empty or short, when any entry in the
    /// batch failed, or once `gc_max_result_size` entries were examined.
    /// A batch size of 0 fetches everything due in one batch.
    pub async fn run_once(&self) -> PathMapResult<GcReport> {
        let _guard = self.running.lock().await;
        let cutoff = Utc::now()
            .checked_sub_signed(self.grace_period)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut report = GcReport::default();

        loop {
            let remaining = if self.max_result_size == 0 {
                usize::MAX
            } else {
                self.max_result_size.saturating_sub(report.examined)
            };
            if remaining == 0 {
                break;
            }
            let limit = match self.batch_size {
                0 if remaining == usize::MAX => 0,
                0 => remaining,
                n => n.min(remaining),
            };

            let batch = self.db.scan_reclaims(cutoff, limit).await?;
            if batch.is_empty() {
                break;
            }
            report.batches += 1;
            let fetched = batch.len();
            let mut batch_failed = false;

            for entry in batch {
                report.examined += 1;
                if let Err(err) = self.store.delete(&entry.storage_location).await {
                    warn!(file_id = %entry.file_id, location = %entry.storage_location, error = %err, "physical delete failed, keeping reclaim entry");
                    report.failed += 1;
                    report.errors.push((entry, err));
                    batch_failed = true;
                    continue;
                }
                match self.db.remove_reclaim(&entry).await {
                    Ok(()) => {
                        debug!(file_id = %entry.file_id, location = %entry.storage_location, "blob reclaimed");
                        report.deleted += 1;
                    }
                    Err(err) => {
                        warn!(file_id = %entry.file_id, error = %err, "failed to dequeue reclaimed blob");
                        report.failed += 1;
                        report.errors.push((entry, err));
                        batch_failed = true;
                    }
                }
            }

            if batch_failed
                || self.batch_size == 0
                || fetched < self.batch_size
                || (self.max_result_size > 0 && report.examined >= self.max_result_size)
            {
                break;
            }
        }

        Ok(report)
    }

    /// Runs [`run_once`](Self::run_once) every `interval` until `cancel`
    /// fires. Errors and panics are logged and the schedule keeps going.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match AssertUnwindSafe(self.run_once()).catch_unwind().await {
                    Ok(Ok(report)) => {
                        if report.examined > 0 {
                            info!(
                                examined = report.examined,
                                deleted = report.deleted,
                                failed = report.failed,
                                "gc run complete"
                            );
                        } else {
                            debug!("gc run found nothing to reclaim");
                        }
                    }
                    Ok(Err(err)) => error!(error = %err, "gc run failed"),
                    Err(_) => error!("gc run panicked"),
                }
            }
            debug!("periodic gc stopped");
        })
    }
}

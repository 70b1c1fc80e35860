//! Best-effort bookkeeping that may run off the caller's path.

use pathmapped_core::PathMapResult;
use std::future::Future;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Runs bookkeeping tasks either inline or as tracked background tasks.
///
/// Failures are logged and never reach the caller.
#[derive(Debug, Clone)]
pub struct Deferred {
    tracker: Option<TaskTracker>,
}

impl Deferred {
    pub fn inline() -> Self {
        Self { tracker: None }
    }

    pub fn background() -> Self {
        Self {
            tracker: Some(TaskTracker::new()),
        }
    }

    pub fn is_background(&self) -> bool {
        self.tracker.is_some()
    }

    pub async fn run<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = PathMapResult<()>> + Send + 'static,
    {
        match &self.tracker {
            None => {
                if let Err(err) = task.await {
                    warn!(task = label, error = %err, "bookkeeping task failed");
                }
            }
            Some(tracker) => {
                tracker.spawn(async move {
                    if let Err(err) = task.await {
                        warn!(task = label, error = %err, "deferred bookkeeping task failed");
                    }
                });
            }
        }
    }

    /// Waits until every task submitted so far has finished.
    pub async fn flush(&self) {
        if let Some(tracker) = &self.tracker {
            tracker.close();
            tracker.wait().await;
            tracker.reopen();
        }
    }

    pub fn pending(&self) -> usize {
        self.tracker.as_ref().map_or(0, TaskTracker::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn inline_runs_before_returning() {
        let hits = Arc::new(AtomicUsize::new(0));
        let d = Deferred::inline();
        let h = hits.clone();
        d.run("count", async move {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn background_completes_on_flush() {
        let hits = Arc::new(AtomicUsize::new(0));
        let d = Deferred::background();
        for _ in 0..10 {
            let h = hits.clone();
            d.run("count", async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        }
        d.flush().await;
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(d.pending(), 0);

        // still usable after a flush
        let h = hits.clone();
        d.run("count", async move {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        d.flush().await;
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let d = Deferred::inline();
        d.run("fail", async { Err(anyhow::anyhow!("boom").into()) })
            .await;
    }
}

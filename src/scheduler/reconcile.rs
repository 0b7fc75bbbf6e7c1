use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::scheduler::job::JobStatus;
use crate::store::JobStore;

/// Recovers jobs stranded in `active` by a worker that died mid-search.
///
/// A job is stranded when its in-progress marker has expired but its record
/// still says `active` and it started longer ago than the marker lifetime.
/// Such jobs are returned to the pending queue with their original
/// submission score, so they keep their place in line.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    config: SchedulerConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn JobStore>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.reconcile_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }
    }

    /// One pass over the active index. Returns the number of re-pended jobs.
    pub async fn sweep(&self) -> Result<usize> {
        let marker_ttl = chrono::Duration::seconds(self.config.marker_ttl_secs as i64);
        let now = Utc::now();
        let mut repended = 0;

        for id in self.store.active_ids().await? {
            if self.store.is_in_progress(&id).await? {
                continue;
            }
            let Some(mut job) = self.store.read_record(&id).await? else {
                self.store.untrack_active(&id).await?;
                continue;
            };
            if job.status != JobStatus::Active {
                // Finished, but the index entry outlived the worker.
                self.store.untrack_active(&id).await?;
                continue;
            }
            let stale = job
                .started_at
                .map_or(true, |started| now - started >= marker_ttl);
            if !stale {
                continue;
            }

            job.repend();
            self.store
                .write_record(&job, self.config.record_ttl(JobStatus::Pending))
                .await?;
            self.store.insert_pending(&job.id, job.score()).await?;
            self.store.untrack_active(&job.id).await?;
            tracing::warn!(job_id = %job.id, "Re-pended stranded active job");
            repended += 1;
        }

        if repended > 0 {
            tracing::info!(repended, "Reconciliation sweep finished");
        }
        Ok(repended)
    }
}

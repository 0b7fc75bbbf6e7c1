use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::scheduler::job::{Job, JobResult, JobStatus};
use crate::search::{AddressSearch, SearchOutcome};
use crate::store::JobStore;
use crate::task::spawn_supervised;

/// Worker admission loop.
///
/// Each tick admits pending jobs oldest first while the number of live
/// in-progress markers is below `max_concurrent`. Admission claims the
/// marker, removes the id from the pending queue, writes the `active`
/// record and indexes it before the search is spawned. The tick never
/// awaits a search. While a search runs its marker is renewed every third
/// of the marker lifetime, so only a dead worker's marker expires.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn AddressSearch>,
    config: SchedulerConfig,
    program_id: String,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn AddressSearch>,
        config: SchedulerConfig,
        program_id: String,
    ) -> Self {
        Self {
            store,
            engine,
            config,
            program_id,
        }
    }

    /// Tick on the configured interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        tracing::info!(
            tick_ms = self.config.tick_interval_ms,
            max_concurrent = self.config.max_concurrent,
            engine = self.engine.name(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Admit as many pending jobs as capacity allows. Returns how many were
    /// admitted.
    pub async fn tick(&self) -> Result<usize> {
        let mut admitted = 0;
        loop {
            let active = self.store.active_count().await?;
            if active >= self.config.max_concurrent as u64 {
                tracing::debug!(active, "At concurrency ceiling");
                break;
            }
            let Some(id) = self.store.pop_oldest_pending().await? else {
                break;
            };
            if !self
                .store
                .mark_in_progress(&id, self.config.marker_ttl())
                .await?
            {
                tracing::debug!(job_id = %id, "Job already claimed elsewhere");
                break;
            }

            match self.activate(&id).await {
                Ok(Some(job)) => {
                    self.spawn_search(job);
                    admitted += 1;
                }
                Ok(None) => {
                    self.store.clear_in_progress(&id).await?;
                }
                Err(e) => {
                    self.store.clear_in_progress(&id).await?;
                    return Err(e);
                }
            }
        }
        Ok(admitted)
    }

    /// Move a claimed job to `active`. `None` when its record expired or it
    /// is no longer pending. On a store error the id goes back to pending.
    async fn activate(&self, id: &str) -> Result<Option<Job>> {
        let record = match self.store.read_record(id).await {
            Ok(record) => record,
            Err(e) => {
                // Score unknown without the record; requeue at the back.
                self.store
                    .insert_pending(id, Utc::now().timestamp_millis())
                    .await?;
                return Err(e);
            }
        };
        let Some(mut job) = record else {
            tracing::warn!(job_id = %id, "Pending job has no record, dropping");
            return Ok(None);
        };
        if job.status != JobStatus::Pending {
            tracing::warn!(job_id = %id, status = %job.status, "Skipping non-pending job");
            return Ok(None);
        }

        job.activate(Utc::now());
        if let Err(e) = self.write_active(&job).await {
            self.store.insert_pending(&job.id, job.score()).await?;
            return Err(e);
        }
        tracing::info!(
            job_id = %job.id,
            request_id = %job.request_id,
            max_attempts = job.request.max_attempts,
            "Job admitted"
        );
        Ok(Some(job))
    }

    async fn write_active(&self, job: &Job) -> Result<()> {
        self.store
            .write_record(job, self.config.record_ttl(JobStatus::Active))
            .await?;
        self.store.track_active(&job.id).await
    }

    fn spawn_search(&self, job: Job) {
        let scheduler = self.clone();
        spawn_supervised("search", async move { scheduler.run_search(job).await });
    }

    /// Run the search in its own task so a panic is caught here and
    /// recorded as a failure.
    async fn run_search(&self, job: Job) -> Result<()> {
        let started = Instant::now();
        let engine = Arc::clone(&self.engine);
        let request = job.search_request(&self.program_id);
        let mut search = tokio::spawn(async move { engine.search(&request).await });
        let outcome = self.hold_claim(&job.id, &mut search).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(SearchOutcome::Found(m))) => {
                self.complete(job, JobResult::from_match(m, elapsed_ms))
                    .await
            }
            Ok(Ok(SearchOutcome::Exhausted { attempts })) => {
                let reason = format!("no match within attempt budget ({} attempts)", attempts);
                self.fail(job, reason).await
            }
            Ok(Err(e)) => self.fail(job, e.to_string()).await,
            Err(e) if e.is_panic() => self.fail(job, "search panicked".to_string()).await,
            Err(_) => self.fail(job, "search cancelled".to_string()).await,
        }
    }

    /// Await the search, renewing the job's marker until it finishes.
    async fn hold_claim<T>(
        &self,
        id: &str,
        search: &mut JoinHandle<T>,
    ) -> std::result::Result<T, JoinError> {
        let ttl = self.config.marker_ttl();
        let period = (ttl / 3).max(Duration::from_millis(10));
        let mut renew = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                outcome = &mut *search => return outcome,
                _ = renew.tick() => match self.store.refresh_in_progress(id, ttl).await {
                    Ok(true) => tracing::trace!(job_id = %id, "Marker renewed"),
                    Ok(false) => tracing::warn!(job_id = %id, "Marker lost while searching"),
                    Err(e) => tracing::warn!(job_id = %id, error = %e, "Marker renewal failed"),
                },
            }
        }
    }

    async fn complete(&self, mut job: Job, result: JobResult) -> Result<()> {
        tracing::info!(
            job_id = %job.id,
            address = %result.address,
            attempts = result.attempts,
            elapsed_ms = result.elapsed_ms,
            "Job completed"
        );
        job.complete(result, Utc::now());
        self.finish(&job).await
    }

    async fn fail(&self, mut job: Job, error: String) -> Result<()> {
        tracing::warn!(job_id = %job.id, error = %error, "Job failed");
        job.fail(error, Utc::now());
        self.finish(&job).await
    }

    /// Persist a terminal record, then release every index entry. The
    /// record is written first so a job admitted after the marker clears
    /// starts no earlier than this one completed.
    async fn finish(&self, job: &Job) -> Result<()> {
        self.store
            .write_record(job, self.config.record_ttl(job.status))
            .await?;
        self.store.remove_pending(&job.id).await?;
        self.store.untrack_active(&job.id).await?;
        self.store.clear_in_progress(&job.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SearchConfig, DEFAULT_PROGRAM_ID};
    use crate::error::VanityError;
    use crate::scheduler::queue::{JobQueue, Submission};
    use crate::scheduler::reconcile::Reconciler;
    use crate::search::test_support::key;
    use crate::search::{PatternKind, PortableSearch, SearchMode, SearchRequest};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct PanickingSearch;

    #[async_trait]
    impl AddressSearch for PanickingSearch {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn search(&self, _request: &SearchRequest) -> Result<SearchOutcome> {
            panic!("engine blew up");
        }
    }

    /// Matches nothing, slowly, and counts how often it was started.
    #[derive(Debug, Default)]
    struct SlowSearch {
        started: AtomicUsize,
    }

    #[async_trait]
    impl AddressSearch for SlowSearch {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            Ok(SearchOutcome::Exhausted {
                attempts: request.max_attempts,
            })
        }
    }

    #[derive(Debug)]
    struct FailingSearch;

    #[async_trait]
    impl AddressSearch for FailingSearch {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn search(&self, _request: &SearchRequest) -> Result<SearchOutcome> {
            Err(VanityError::Internal("engine offline".to_string()))
        }
    }

    fn setup(engine: Arc<dyn AddressSearch>, max_concurrent: usize) -> (Scheduler, JobQueue) {
        let store = Arc::new(MemoryStore::new());
        let config = SchedulerConfig {
            max_concurrent,
            ..SchedulerConfig::default()
        };
        let queue = JobQueue::new(store.clone(), config.clone(), &SearchConfig::default());
        let scheduler = Scheduler::new(store, engine, config, DEFAULT_PROGRAM_ID.to_string());
        (scheduler, queue)
    }

    fn submission(id: &str, pattern: &str, max_attempts: u64) -> Submission {
        Submission {
            job_id: Some(id.to_string()),
            requester_key: key(1),
            subject_key: key(2),
            target_pattern: pattern.to_string(),
            max_attempts: Some(max_attempts),
            pattern_kind: PatternKind::Suffix,
            mode: SearchMode::Derived,
        }
    }

    async fn wait_terminal(queue: &JobQueue, id: &str) -> Job {
        for _ in 0..500 {
            let job = queue.status(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn tick_respects_ceiling() {
        let engine = Arc::new(PortableSearch::new(SearchConfig::default()));
        let (scheduler, queue) = setup(engine, 2);
        for id in ["a", "b", "c"] {
            // Infeasible pattern keeps the searches busy briefly.
            queue.submit(submission(id, "zzzzzzzz", 50_000), "t").await.unwrap();
        }

        assert_eq!(scheduler.tick().await.unwrap(), 2);
        assert_eq!(scheduler.tick().await.unwrap(), 0);
        assert_eq!(queue.status("c").await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn exhausted_search_records_failure() {
        let engine = Arc::new(PortableSearch::new(SearchConfig::default()));
        let (scheduler, queue) = setup(engine, 1);
        queue.submit(submission("x", "zzzzzzzz", 200), "t").await.unwrap();

        assert_eq!(scheduler.tick().await.unwrap(), 1);
        let job = wait_terminal(&queue, "x").await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("200 attempts"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn engine_error_becomes_failed_record() {
        let (scheduler, queue) = setup(Arc::new(FailingSearch), 1);
        queue.submit(submission("x", "ab", 10), "t").await.unwrap();
        scheduler.tick().await.unwrap();

        let job = wait_terminal(&queue, "x").await;
        assert_eq!(job.error.as_deref(), Some("Internal error: engine offline"));
    }

    #[tokio::test]
    async fn engine_panic_becomes_failed_record() {
        let (scheduler, queue) = setup(Arc::new(PanickingSearch), 1);
        queue.submit(submission("x", "ab", 10), "t").await.unwrap();
        scheduler.tick().await.unwrap();

        let job = wait_terminal(&queue, "x").await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("search panicked"));

        // Capacity is released after the failure.
        queue.submit(submission("y", "ab", 10), "t").await.unwrap();
        assert_eq!(scheduler.tick().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (scheduler, _) = setup(Arc::new(FailingSearch), 1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn marker_outlives_its_ttl_while_search_runs() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(SlowSearch::default());
        let config = SchedulerConfig {
            max_concurrent: 1,
            marker_ttl_secs: 1,
            ..SchedulerConfig::default()
        };
        let queue = JobQueue::new(store.clone(), config.clone(), &SearchConfig::default());
        let scheduler = Scheduler::new(
            store.clone(),
            engine.clone(),
            config.clone(),
            DEFAULT_PROGRAM_ID.to_string(),
        );
        let reconciler = Reconciler::new(store.clone(), config);

        queue.submit(submission("long", "ab", 10), "t").await.unwrap();
        assert_eq!(scheduler.tick().await.unwrap(), 1);

        // Past the marker lifetime, with the search still running.
        tokio::time::sleep(Duration::from_millis(1_400)).await;
        assert!(store.is_in_progress("long").await.unwrap());
        assert_eq!(store.active_count().await.unwrap(), 1);
        assert_eq!(reconciler.sweep().await.unwrap(), 0);
        assert_eq!(scheduler.tick().await.unwrap(), 0);

        let job = wait_terminal(&queue, "long").await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(engine.started.load(Ordering::SeqCst), 1);
        assert!(!store.is_in_progress("long").await.unwrap());
    }
}

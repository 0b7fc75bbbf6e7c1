//! Shared setup for service-level integration tests.
//!
//! Builds a full service over an in-process store and the portable search
//! engine, with short intervals so loops make progress within a test.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vanity_lite::config::{RetryPolicy, ServiceConfig};
use vanity_lite::retry::poll_until;
use vanity_lite::scheduler::{Job, JobQueue, Submission};
use vanity_lite::search::{base58, PatternKind, PortableSearch, SearchMode};
use vanity_lite::service::Service;
use vanity_lite::store::MemoryStore;

pub const TOKEN: &str = "test-token";

/// A well-formed 32-byte key.
pub fn key(byte: u8) -> String {
    base58::encode(&[byte; 32])
}

/// Service config with fast ticks and a single known token.
pub fn test_config(max_concurrent: usize) -> ServiceConfig {
    let mut config = ServiceConfig::new("127.0.0.1:0".parse().unwrap()).with_token(TOKEN.to_string());
    config.scheduler.max_concurrent = max_concurrent;
    config.scheduler.tick_interval_ms = 10;
    config.scheduler.reconcile_interval_ms = 20;
    config.pool.check_interval_ms = 20;
    config.search.batch_size = 256;
    config.search.yield_every = 128;
    config
}

#[allow(dead_code)]
pub fn submission(id: &str, pattern: &str, max_attempts: u64) -> Submission {
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

/// Handle to a service whose background loops are running.
pub struct TestService {
    pub store: Arc<MemoryStore>,
    pub service: Service,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TestService {
    /// Build without starting any loop.
    pub fn build(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(PortableSearch::new(config.search.clone()));
        let service = Service::with_parts(config, store.clone(), store.clone(), engine);
        Self {
            store,
            service,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn start_scheduler(&mut self) {
        let scheduler = self.service.scheduler.clone();
        let cancel = self.cancel.clone();
        self.handles
            .push(tokio::spawn(async move { scheduler.run(cancel).await }));
    }

    #[allow(dead_code)]
    pub fn start_reconciler(&mut self) {
        let reconciler = self.service.reconciler.clone();
        let cancel = self.cancel.clone();
        self.handles
            .push(tokio::spawn(async move { reconciler.run(cancel).await }));
    }

    #[allow(dead_code)]
    pub fn start_pool_warmer(&mut self) {
        let pool = self.service.pool.clone();
        let cancel = self.cancel.clone();
        self.handles
            .push(tokio::spawn(async move { pool.run(cancel).await }));
    }

    #[allow(dead_code)]
    pub fn queue(&self) -> &JobQueue {
        &self.service.queue
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[allow(dead_code)]
/// Poll `check` every 10ms until it yields a value or `timeout` passes.
pub async fn wait_for<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let polls = (timeout.as_millis() / 10).max(1) as u32;
    let policy = RetryPolicy::fixed(polls, 10);
    poll_until(&policy, || {
        let fut = check();
        async move { Ok::<_, ()>(fut.await) }
    })
    .await
    .ok()
    .flatten()
}

/// Wait for a job to reach `completed` or `failed`.
#[allow(dead_code)]
pub async fn wait_terminal(queue: &JobQueue, id: &str, timeout: Duration) -> Job {
    wait_for(timeout, move || async move {
        queue
            .status(id)
            .await
            .ok()
            .filter(|job| job.status.is_terminal())
    })
    .await
    .unwrap_or_else(|| panic!("job {} did not finish within {:?}", id, timeout))
}

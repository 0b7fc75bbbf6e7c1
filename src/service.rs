use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::gate::AdmissionGate;
use crate::pool::PoolWarmer;
use crate::scheduler::{JobQueue, Reconciler, Scheduler};
use crate::search::{select_engine, AddressSearch};
use crate::store::{JobStore, MemoryStore, PoolStore, RedisStore};

/// Every component of a running instance, constructed once at startup.
pub struct Service {
    pub config: ServiceConfig,
    pub queue: JobQueue,
    pub scheduler: Scheduler,
    pub reconciler: Reconciler,
    pub pool: PoolWarmer,
    pub gate: Arc<AdmissionGate>,
    store: Arc<dyn JobStore>,
}

impl Service {
    /// Connect the configured store, pick the search engine and wire the
    /// components together.
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        let (jobs, pools): (Arc<dyn JobStore>, Arc<dyn PoolStore>) = match &config.redis_url {
            Some(url) => {
                let store = Arc::new(RedisStore::connect(url, &config.connect_retry).await?);
                (store.clone(), store)
            }
            None => {
                tracing::warn!("No Redis URL configured, using in-process store");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
        };
        let engine = select_engine(&config.search);
        Ok(Self::with_parts(config, jobs, pools, engine))
    }

    /// Wire the components over the given store and engine.
    pub fn with_parts(
        config: ServiceConfig,
        jobs: Arc<dyn JobStore>,
        pools: Arc<dyn PoolStore>,
        engine: Arc<dyn AddressSearch>,
    ) -> Self {
        let program_id = config.search.program_id.clone();
        let queue = JobQueue::new(jobs.clone(), config.scheduler.clone(), &config.search);
        let scheduler = Scheduler::new(
            jobs.clone(),
            engine.clone(),
            config.scheduler.clone(),
            program_id.clone(),
        );
        let reconciler = Reconciler::new(jobs.clone(), config.scheduler.clone());
        let pool = PoolWarmer::new(pools, engine, config.pool.clone(), program_id);
        let gate = Arc::new(AdmissionGate::new(config.gate.clone()));

        Self {
            config,
            queue,
            scheduler,
            reconciler,
            pool,
            gate,
            store: jobs,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            queue: self.queue.clone(),
            store: self.store.clone(),
            pool: self.pool.clone(),
            gate: self.gate.clone(),
        }
    }

    /// Run the loops and serve the API until `cancel` fires.
    ///
    /// The admission loop, reconciliation sweep and pool warmer run as
    /// spawned tasks; the HTTP server runs on this task.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let scheduler = self.scheduler.clone();
        let scheduler_cancel = cancel.clone();
        let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

        let reconciler = self.reconciler.clone();
        let reconciler_cancel = cancel.clone();
        let reconciler_handle =
            tokio::spawn(async move { reconciler.run(reconciler_cancel).await });

        let pool = self.pool.clone();
        let pool_cancel = cancel.clone();
        let pool_handle = tokio::spawn(async move { pool.run(pool_cancel).await });

        let served = api::serve(self.config.listen_addr, self.api_state(), cancel.clone()).await;

        // The server may also stop on a bind error; stop the loops either way.
        cancel.cancel();
        for handle in [scheduler_handle, reconciler_handle, pool_handle] {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background loop ended abnormally");
            }
        }
        tracing::info!("Service stopped");
        served
    }
}

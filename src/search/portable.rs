use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::config::SearchConfig;
use crate::error::Result;
use crate::search::{
    AddressSearch, BufferPool, Evaluator, PreparedSearch, SearchOutcome, SearchRequest,
};

/// Single-task search that runs on the async runtime.
///
/// Always available; used when the host has one CPU or the parallel engine
/// cannot start.
#[derive(Debug, Clone)]
pub struct PortableSearch {
    config: SearchConfig,
    buffers: BufferPool,
}

impl PortableSearch {
    pub fn new(config: SearchConfig) -> Self {
        let buffers = BufferPool::new(config.pool_buffers);
        Self { config, buffers }
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }
}

#[async_trait]
impl AddressSearch for PortableSearch {
    fn name(&self) -> &'static str {
        "portable"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let prepared = PreparedSearch::prepare(request, self.config.seed_len)?;
        let width = prepared.candidate_len();
        let batch_size = self.config.batch_size.max(1) as u64;
        let yield_every = self.config.yield_every.max(1);

        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mut evaluator = Evaluator::new(&prepared);
        let mut batch = self.buffers.acquire();
        let mut attempts = 0u64;
        let mut since_yield = 0usize;

        while attempts < prepared.max_attempts() {
            let n = batch_size.min(prepared.max_attempts() - attempts) as usize;
            batch.resize(n * width, 0);
            rng.fill_bytes(&mut batch[..]);

            for candidate in batch.chunks_exact(width) {
                attempts += 1;
                if let Some(hit) = evaluator.evaluate(candidate) {
                    tracing::debug!(attempts, engine = "portable", "Pattern matched");
                    return Ok(SearchOutcome::Found(prepared.into_match(hit, attempts)?));
                }
                since_yield += 1;
                if since_yield == yield_every {
                    since_yield = 0;
                    tokio::task::yield_now().await;
                }
            }
        }

        Ok(SearchOutcome::Exhausted { attempts })
    }
}

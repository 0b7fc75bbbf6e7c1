use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::SearchConfig;
use crate::error::{Result, VanityError};
use crate::search::{
    AddressSearch, BufferPool, Evaluator, PreparedSearch, SearchOutcome, SearchRequest,
};

/// Multi-core search: each batch is evaluated across a dedicated rayon pool
/// from tokio's blocking thread pool.
///
/// The first match in candidate order wins, so `attempts` counts exactly the
/// candidates before and including the hit, as in [`super::PortableSearch`].
#[derive(Debug, Clone)]
pub struct ParallelSearch {
    config: SearchConfig,
    buffers: BufferPool,
    pool: Arc<ThreadPool>,
}

impl ParallelSearch {
    pub fn new(config: SearchConfig, threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("vanity-search-{}", i))
            .build()
            .map_err(|e| VanityError::Internal(format!("search thread pool: {}", e)))?;
        let buffers = BufferPool::new(config.pool_buffers);
        Ok(Self {
            config,
            buffers,
            pool: Arc::new(pool),
        })
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }
}

#[async_trait]
impl AddressSearch for ParallelSearch {
    fn name(&self) -> &'static str {
        "parallel"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let prepared = PreparedSearch::prepare(request, self.config.seed_len)?;
        let batch_size = self.config.batch_size.max(1);
        let buffers = self.buffers.clone();
        let pool = Arc::clone(&self.pool);

        tokio::task::spawn_blocking(move || {
            pool.install(|| run_batches(&prepared, batch_size, &buffers))
        })
        .await
        .map_err(|e| VanityError::Internal(format!("search worker failed: {}", e)))?
    }
}

fn run_batches(
    prepared: &PreparedSearch,
    batch_size: usize,
    buffers: &BufferPool,
) -> Result<SearchOutcome> {
    let width = prepared.candidate_len();
    let mut rng = StdRng::from_rng(&mut rand::rng());
    let mut batch = buffers.acquire();
    let mut attempts = 0u64;

    while attempts < prepared.max_attempts() {
        let n = (batch_size as u64).min(prepared.max_attempts() - attempts) as usize;
        batch.resize(n * width, 0);
        rng.fill_bytes(&mut batch[..]);

        let hit = batch
            .par_chunks_exact(width)
            .enumerate()
            .map_init(
                || Evaluator::new(prepared),
                |evaluator, (i, candidate)| evaluator.evaluate(candidate).map(|hit| (i, hit)),
            )
            .find_first(Option::is_some)
            .flatten();

        if let Some((i, hit)) = hit {
            let attempts = attempts + i as u64 + 1;
            tracing::debug!(attempts, engine = "parallel", "Pattern matched");
            return Ok(SearchOutcome::Found(prepared.into_match(hit, attempts)?));
        }
        attempts += n as u64;
    }

    Ok(SearchOutcome::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::request;
    use crate::search::{DerivationParams, SearchMode};

    fn engine() -> ParallelSearch {
        let config = SearchConfig {
            batch_size: 512,
            ..SearchConfig::default()
        };
        ParallelSearch::new(config, 4).unwrap()
    }

    #[tokio::test]
    async fn finds_short_suffix_with_derivation_params() {
        let req = request("ab", SearchMode::Derived, 2_000_000);
        let SearchOutcome::Found(m) = engine().search(&req).await.unwrap() else {
            panic!("two-character suffix should match within budget");
        };
        assert!(m.address.to_ascii_lowercase().ends_with("ab"));
        assert!(matches!(m.params, DerivationParams::Derived { .. }));
    }

    #[tokio::test]
    async fn exhaustion_counts_every_candidate() {
        let req = request(&"z".repeat(45), SearchMode::Derived, 1_300);
        let outcome = engine().search(&req).await.unwrap();
        assert_eq!(outcome, SearchOutcome::Exhausted { attempts: 1_300 });
    }

    #[tokio::test]
    async fn rejects_invalid_request_without_spawning() {
        let req = request("a", SearchMode::Derived, 0);
        assert!(matches!(
            engine().search(&req).await,
            Err(VanityError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn reuses_batch_buffer() {
        let engine = engine();
        let req = request(&"z".repeat(45), SearchMode::Derived, 100);
        engine.search(&req).await.unwrap();
        engine.search(&req).await.unwrap();
        assert_eq!(engine.buffers().allocations(), 1);
    }
}

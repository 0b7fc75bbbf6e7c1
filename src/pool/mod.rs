//! Warm pool of ready vanity addresses.
//!
//! The warmer keeps up to `target` pre-computed derived addresses for each
//! tracked (requester, subject) pair, so a common request is served by a
//! single list pop instead of a queued job. A take that drains a pair below
//! `low_water` triggers a background refill; a miss falls back to a small
//! synchronous search.
//!
//! Refill work is bounded twice: at most `max_tracked_pairs` pairs are
//! tracked, and at most `max_concurrent_refills` refills search at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, PoolPair};
use crate::error::{Result, VanityError};
use crate::search::{
    base58, AddressSearch, DerivationParams, PatternKind, SearchMode, SearchOutcome,
    SearchRequest,
};
use crate::store::PoolStore;
use crate::task::spawn_supervised;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub requester_key: String,
    pub subject_key: String,
    pub address: String,
    pub params: DerivationParams,
    pub generated_at: DateTime<Utc>,
}

/// Where a taken entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSource {
    Pool,
    OnDemand,
}

struct Inner {
    store: Arc<dyn PoolStore>,
    engine: Arc<dyn AddressSearch>,
    config: PoolConfig,
    program_id: String,
    tracked: RwLock<Vec<PoolPair>>,
    refilling: Mutex<HashSet<PoolPair>>,
    /// Signalled whenever a refill releases its pair
    refill_done: Notify,
    refill_permits: Semaphore,
}

impl Inner {
    fn refilling(&self) -> MutexGuard<'_, HashSet<PoolPair>> {
        self.refilling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears a pair's in-flight refill flag when the refill ends, however it
/// ends.
struct RefillGuard {
    inner: Arc<Inner>,
    pair: PoolPair,
}

impl Drop for RefillGuard {
    fn drop(&mut self) {
        self.inner.refilling().remove(&self.pair);
        self.inner.refill_done.notify_waiters();
    }
}

#[derive(Clone)]
pub struct PoolWarmer {
    inner: Arc<Inner>,
}

impl PoolWarmer {
    pub fn new(
        store: Arc<dyn PoolStore>,
        engine: Arc<dyn AddressSearch>,
        config: PoolConfig,
        program_id: String,
    ) -> Self {
        let tracked = config.pairs.clone();
        let permits = config.max_concurrent_refills.max(1);
        Self {
            inner: Arc::new(Inner {
                store,
                engine,
                config,
                program_id,
                tracked: RwLock::new(tracked),
                refilling: Mutex::new(HashSet::new()),
                refill_done: Notify::new(),
                refill_permits: Semaphore::new(permits),
            }),
        }
    }

    /// Check every tracked pair on the configured interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.config.check_interval());
        tracing::info!(
            check_ms = self.inner.config.check_interval_ms,
            low_water = self.inner.config.low_water,
            target = self.inner.config.target,
            "Pool warmer started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.check().await {
                        tracing::error!(error = %e, "Pool check failed");
                    }
                }
            }
        }
    }

    /// Start a refill for every tracked pair below the low-water mark.
    /// Returns how many refills were started.
    pub async fn check(&self) -> Result<usize> {
        let pairs = self.inner.tracked.read().await.clone();
        let mut started = 0;
        for pair in pairs {
            let count = self
                .inner
                .store
                .pool_count(&pair.requester_key, &pair.subject_key)
                .await?;
            if count < self.inner.config.low_water as u64 && self.trigger_refill(pair) {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Pop a ready entry, or search for one on the spot.
    pub async fn take(
        &self,
        requester_key: &str,
        subject_key: &str,
    ) -> Result<(PoolEntry, PoolSource)> {
        let (pair, tracked) = self.track(requester_key, subject_key).await?;

        if let Some(entry) = self.inner.store.pop_entry(requester_key, subject_key).await? {
            let remaining = self.inner.store.pool_count(requester_key, subject_key).await?;
            tracing::debug!(requester = %requester_key, remaining, "Pool hit");
            if tracked && remaining < self.inner.config.low_water as u64 {
                self.trigger_refill(pair);
            }
            return Ok((entry, PoolSource::Pool));
        }

        tracing::info!(requester = %requester_key, subject = %subject_key, "Pool miss, searching on demand");
        if tracked {
            self.trigger_refill(pair.clone());
        }
        match self
            .inner
            .search_entry(&pair, self.inner.config.on_demand_attempts)
            .await?
        {
            SearchResult::Entry(entry) => Ok((entry, PoolSource::OnDemand)),
            SearchResult::Exhausted(attempts) => Err(VanityError::PoolExhausted { attempts }),
        }
    }

    /// Fill a pair to target and wait for it. Returns the pair's pool size.
    ///
    /// A refill already running for the pair is waited out first, so the
    /// pair never overshoots `target`.
    pub async fn refill_now(&self, requester_key: &str, subject_key: &str) -> Result<u64> {
        let (pair, _) = self.track(requester_key, subject_key).await?;
        let guard = self.claim_refill(pair).await;
        guard.inner.fill(&guard.pair).await
    }

    pub async fn size(&self, requester_key: &str, subject_key: &str) -> Result<u64> {
        self.inner.store.pool_count(requester_key, subject_key).await
    }

    pub async fn total(&self) -> Result<u64> {
        self.inner.store.pool_total().await
    }

    pub fn is_refilling(&self, requester_key: &str, subject_key: &str) -> bool {
        self.inner
            .refilling()
            .contains(&PoolPair::new(requester_key, subject_key))
    }

    /// Wait until no refill runs for `pair`, then hold its refill flag.
    async fn claim_refill(&self, pair: PoolPair) -> RefillGuard {
        loop {
            let released = self.inner.refill_done.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed.
            released.as_mut().enable();
            if self.inner.refilling().insert(pair.clone()) {
                return RefillGuard {
                    inner: Arc::clone(&self.inner),
                    pair,
                };
            }
            released.await;
        }
    }

    /// Spawn a background refill unless one is already running for `pair`.
    fn trigger_refill(&self, pair: PoolPair) -> bool {
        if !self.inner.refilling().insert(pair.clone()) {
            return false;
        }
        let guard = RefillGuard {
            inner: Arc::clone(&self.inner),
            pair,
        };
        spawn_supervised("pool-refill", async move {
            let count = guard.inner.fill(&guard.pair).await?;
            tracing::info!(requester = %guard.pair.requester_key, count, "Pool refilled");
            Ok::<_, VanityError>(())
        });
        true
    }

    /// Validate a pair and remember it for periodic checks while there is
    /// room. The flag tells whether the pair is tracked.
    async fn track(&self, requester_key: &str, subject_key: &str) -> Result<(PoolPair, bool)> {
        base58::decode_key(requester_key)?;
        base58::decode_key(subject_key)?;
        let pair = PoolPair::new(requester_key, subject_key);
        {
            let tracked = self.inner.tracked.read().await;
            if tracked.contains(&pair) {
                return Ok((pair, true));
            }
        }
        let mut tracked = self.inner.tracked.write().await;
        if tracked.contains(&pair) {
            return Ok((pair, true));
        }
        if tracked.len() >= self.inner.config.max_tracked_pairs {
            tracing::debug!(
                requester = %requester_key,
                limit = self.inner.config.max_tracked_pairs,
                "Pair limit reached, serving on demand only"
            );
            return Ok((pair, false));
        }
        tracked.push(pair.clone());
        Ok((pair, true))
    }
}

enum SearchResult {
    Entry(PoolEntry),
    Exhausted(u64),
}

impl Inner {
    /// Search until the pair holds `target` entries or too many searches in
    /// a row come back empty.
    async fn fill(&self, pair: &PoolPair) -> Result<u64> {
        let _permit = self
            .refill_permits
            .acquire()
            .await
            .map_err(|_| VanityError::Internal("refill permits closed".to_string()))?;
        let target = self.config.target as u64;
        let mut count = self
            .store
            .pool_count(&pair.requester_key, &pair.subject_key)
            .await?;
        let mut failed_rounds = 0;

        while count < target {
            match self.search_entry(pair, self.config.attempts_per_entry).await? {
                SearchResult::Entry(entry) => {
                    count = self.store.push_entry(&entry).await?;
                    failed_rounds = 0;
                }
                SearchResult::Exhausted(attempts) => {
                    failed_rounds += 1;
                    tracing::debug!(attempts, failed_rounds, "Pool search exhausted");
                    if failed_rounds >= self.config.max_failed_rounds {
                        tracing::warn!(
                            requester = %pair.requester_key,
                            count,
                            target,
                            "Pool refill giving up"
                        );
                        break;
                    }
                }
            }
        }
        Ok(count)
    }

    async fn search_entry(&self, pair: &PoolPair, max_attempts: u64) -> Result<SearchResult> {
        let request = SearchRequest {
            program_id: self.program_id.clone(),
            requester_key: pair.requester_key.clone(),
            subject_key: pair.subject_key.clone(),
            pattern: self.config.pattern.clone(),
            pattern_kind: PatternKind::Suffix,
            mode: SearchMode::Derived,
            max_attempts,
        };
        Ok(match self.engine.search(&request).await? {
            SearchOutcome::Found(m) => SearchResult::Entry(PoolEntry {
                requester_key: pair.requester_key.clone(),
                subject_key: pair.subject_key.clone(),
                address: m.address,
                params: m.params,
                generated_at: Utc::now(),
            }),
            SearchOutcome::Exhausted { attempts } => SearchResult::Exhausted(attempts),
        })
    }
}

//! Shared job and pool storage.
//!
//! Every piece of cross-worker state lives behind these traits and is only
//! mutated through their atomic primitives, so several service instances
//! can run the scheduler against one store. [`MemoryStore`] backs a single
//! process and the tests; [`RedisStore`] backs a deployment.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::pool::PoolEntry;
use crate::scheduler::job::Job;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add `id` to the pending queue. Lower scores are admitted first.
    async fn insert_pending(&self, id: &str, score: i64) -> Result<()>;

    /// Remove and return the id with the lowest score.
    async fn pop_oldest_pending(&self) -> Result<Option<String>>;

    async fn remove_pending(&self, id: &str) -> Result<()>;

    async fn pending_count(&self) -> Result<u64>;

    /// Claim `id` for this worker until `ttl` elapses.
    ///
    /// Returns `false` when a live marker already exists. Exactly one of
    /// any number of concurrent callers observes `true`.
    async fn mark_in_progress(&self, id: &str, ttl: Duration) -> Result<bool>;

    /// Push a live marker's deadline out to `ttl` from now.
    ///
    /// Returns `false` when the marker is gone or already expired; the
    /// claim is lost and is not recreated.
    async fn refresh_in_progress(&self, id: &str, ttl: Duration) -> Result<bool>;

    async fn clear_in_progress(&self, id: &str) -> Result<()>;

    async fn is_in_progress(&self, id: &str) -> Result<bool>;

    /// Number of live (unexpired) in-progress markers.
    async fn active_count(&self) -> Result<u64>;

    async fn write_record(&self, job: &Job, ttl: Duration) -> Result<()>;

    /// Write `job` only if no record with its id exists.
    async fn create_record(&self, job: &Job, ttl: Duration) -> Result<bool>;

    async fn read_record(&self, id: &str) -> Result<Option<Job>>;

    async fn delete_record(&self, id: &str) -> Result<()>;

    async fn track_active(&self, id: &str) -> Result<()>;

    async fn untrack_active(&self, id: &str) -> Result<()>;

    async fn active_ids(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Append an entry and return the pair's new count.
    async fn push_entry(&self, entry: &PoolEntry) -> Result<u64>;

    async fn pop_entry(&self, requester_key: &str, subject_key: &str)
        -> Result<Option<PoolEntry>>;

    async fn pool_count(&self, requester_key: &str, subject_key: &str) -> Result<u64>;

    /// Entries across every pair.
    async fn pool_total(&self) -> Result<u64>;
}

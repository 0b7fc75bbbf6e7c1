use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::pool::PoolEntry;
use crate::scheduler::job::Job;
use crate::store::{JobStore, PoolStore};

/// Minimum spacing between full sweeps of expired records and markers.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Inner {
    /// Ordered by (score, id); `scores` maps id back to its entry.
    pending: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
    /// Marker deadlines
    markers: HashMap<String, Instant>,
    records: HashMap<String, (Job, Instant)>,
    active: HashSet<String>,
    pools: HashMap<(String, String), VecDeque<PoolEntry>>,
    next_purge: Option<Instant>,
}

impl Inner {
    fn live_marker(&mut self, id: &str, now: Instant) -> bool {
        match self.markers.get(id) {
            Some(deadline) if *deadline > now => true,
            Some(_) => {
                self.markers.remove(id);
                false
            }
            None => false,
        }
    }

    /// Drop every expired record and marker, at most once per
    /// [`PURGE_INTERVAL`]. Entries nobody reads again would otherwise stay.
    fn purge_expired(&mut self, now: Instant) {
        if self.next_purge.is_some_and(|next| next > now) {
            return;
        }
        self.records.retain(|_, (_, deadline)| *deadline > now);
        self.markers.retain(|_, deadline| *deadline > now);
        self.next_purge = Some(now + PURGE_INTERVAL);
    }

    fn live_record(&mut self, id: &str, now: Instant) -> Option<&Job> {
        let expired = matches!(self.records.get(id), Some((_, deadline)) if *deadline <= now);
        if expired {
            self.records.remove(id);
        }
        self.records.get(id).map(|(job, _)| job)
    }
}

/// In-process store with the same claim and expiry semantics as the Redis
/// store. Expiry follows the tokio clock, so paused-time tests can advance it.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_pending(&self, id: &str, score: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.scores.insert(id.to_string(), score) {
            inner.pending.remove(&(old, id.to_string()));
        }
        inner.pending.insert((score, id.to_string()));
        Ok(())
    }

    async fn pop_oldest_pending(&self) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        let Some((_, id)) = inner.pending.pop_first() else {
            return Ok(None);
        };
        inner.scores.remove(&id);
        Ok(Some(id))
    }

    async fn remove_pending(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(score) = inner.scores.remove(id) {
            inner.pending.remove(&(score, id.to_string()));
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        Ok(self.inner.lock().await.pending.len() as u64)
    }

    async fn mark_in_progress(&self, id: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if inner.live_marker(id, now) {
            return Ok(false);
        }
        inner.markers.insert(id.to_string(), now + ttl);
        Ok(true)
    }

    async fn refresh_in_progress(&self, id: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if !inner.live_marker(id, now) {
            return Ok(false);
        }
        inner.markers.insert(id.to_string(), now + ttl);
        Ok(true)
    }

    async fn clear_in_progress(&self, id: &str) -> Result<()> {
        self.inner.lock().await.markers.remove(id);
        Ok(())
    }

    async fn is_in_progress(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_marker(id, Instant::now()))
    }

    async fn active_count(&self) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.markers.retain(|_, deadline| *deadline > now);
        Ok(inner.markers.len() as u64)
    }

    async fn write_record(&self, job: &Job, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.purge_expired(now);
        inner.records.insert(job.id.clone(), (job.clone(), now + ttl));
        Ok(())
    }

    async fn create_record(&self, job: &Job, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.purge_expired(now);
        if inner.live_record(&job.id, now).is_some() {
            return Ok(false);
        }
        inner.records.insert(job.id.clone(), (job.clone(), now + ttl));
        Ok(true)
    }

    async fn read_record(&self, id: &str) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_record(id, Instant::now()).cloned())
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        self.inner.lock().await.records.remove(id);
        Ok(())
    }

    async fn track_active(&self, id: &str) -> Result<()> {
        self.inner.lock().await.active.insert(id.to_string());
        Ok(())
    }

    async fn untrack_active(&self, id: &str) -> Result<()> {
        self.inner.lock().await.active.remove(id);
        Ok(())
    }

    async fn active_ids(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<String> = inner.active.iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn push_entry(&self, entry: &PoolEntry) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let list = inner
            .pools
            .entry((entry.requester_key.clone(), entry.subject_key.clone()))
            .or_default();
        list.push_back(entry.clone());
        Ok(list.len() as u64)
    }

    async fn pop_entry(
        &self,
        requester_key: &str,
        subject_key: &str,
    ) -> Result<Option<PoolEntry>> {
        let mut inner = self.inner.lock().await;
        let key = (requester_key.to_string(), subject_key.to_string());
        Ok(inner.pools.get_mut(&key).and_then(VecDeque::pop_front))
    }

    async fn pool_count(&self, requester_key: &str, subject_key: &str) -> Result<u64> {
        let inner = self.inner.lock().await;
        let key = (requester_key.to_string(), subject_key.to_string());
        Ok(inner.pools.get(&key).map_or(0, |list| list.len() as u64))
    }

    async fn pool_total(&self) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.pools.values().map(|list| list.len() as u64).sum())
    }
}

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RetryPolicy;
use crate::error::{Result, VanityError};
use crate::pool::PoolEntry;
use crate::retry::retry;
use crate::scheduler::job::Job;
use crate::store::{JobStore, PoolStore};

mod scripts {
    use redis::Script;

    /// Exclusive claim: drop expired markers, then add only if absent.
    /// Markers are scored by their deadline in milliseconds.
    pub fn claim_marker() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local deadline = tonumber(ARGV[2])
            local id = ARGV[3]

            redis.call('ZREMRANGEBYSCORE', key, '-inf', now)
            return redis.call('ZADD', key, 'NX', deadline, id)
            "#,
        )
    }

    /// Extend a marker only while it is still live.
    pub fn refresh_marker() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local deadline = tonumber(ARGV[2])
            local id = ARGV[3]

            local score = redis.call('ZSCORE', key, id)
            if not score or tonumber(score) <= now then
                return 0
            end
            redis.call('ZADD', key, 'XX', deadline, id)
            return 1
            "#,
        )
    }
}

/// Both marker scripts reply 0 or 1.
fn marker_reply(script: &str, reply: i64) -> Result<bool> {
    match reply {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(VanityError::Store(format!(
            "{} script replied {}, expected 0 or 1",
            script, other
        ))),
    }
}

/// Key layout under a namespace (default `vanity`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.namespace, id)
    }

    pub fn pending(&self) -> String {
        format!("{}:jobs:pending", self.namespace)
    }

    pub fn in_progress(&self) -> String {
        format!("{}:jobs:in_progress", self.namespace)
    }

    pub fn active(&self) -> String {
        format!("{}:jobs:active", self.namespace)
    }

    pub fn pool(&self, requester_key: &str, subject_key: &str) -> String {
        format!("{}:pool:{}:{}", self.namespace, requester_key, subject_key)
    }

    pub fn pool_pairs(&self) -> String {
        format!("{}:pool:pairs", self.namespace)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("vanity")
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .field("keys", &self.keys)
            .finish()
    }
}

impl RedisStore {
    /// Open a managed connection, retrying per `policy` while Redis comes up.
    pub async fn connect(redis_url: &str, policy: &RetryPolicy) -> Result<Self> {
        tracing::info!(url = %redis_url, "Connecting to Redis");
        let client = redis::Client::open(redis_url)?;
        let conn = retry(policy, "redis connect", || {
            ConnectionManager::new(client.clone())
        })
        .await?;
        tracing::info!("Connected to Redis");
        Ok(Self {
            conn,
            keys: KeySpace::default(),
        })
    }

    pub fn with_keys(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn insert_pending(&self, id: &str, score: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zadd(self.keys.pending(), id, score).await?;
        Ok(())
    }

    async fn pop_oldest_pending(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        // Reply is [member, score] or empty.
        let popped: Vec<String> = redis::cmd("ZPOPMIN")
            .arg(self.keys.pending())
            .arg(1)
            .query_async(&mut conn)
            .await?;
        Ok(popped.into_iter().next())
    }

    async fn remove_pending(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(self.keys.pending(), id).await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(self.keys.pending()).await?)
    }

    async fn mark_in_progress(&self, id: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let now = Self::now_ms();
        let deadline = now + ttl.as_millis() as i64;
        let added: i64 = scripts::claim_marker()
            .key(self.keys.in_progress())
            .arg(now)
            .arg(deadline)
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        marker_reply("claim", added)
    }

    async fn refresh_in_progress(&self, id: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let now = Self::now_ms();
        let deadline = now + ttl.as_millis() as i64;
        let refreshed: i64 = scripts::refresh_marker()
            .key(self.keys.in_progress())
            .arg(now)
            .arg(deadline)
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        marker_reply("refresh", refreshed)
    }

    async fn clear_in_progress(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(self.keys.in_progress(), id).await?;
        Ok(())
    }

    async fn is_in_progress(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deadline: Option<f64> = conn.zscore(self.keys.in_progress(), id).await?;
        Ok(deadline.is_some_and(|d| d as i64 > Self::now_ms()))
    }

    async fn active_count(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let live: u64 = redis::cmd("ZCOUNT")
            .arg(self.keys.in_progress())
            .arg(format!("({}", Self::now_ms()))
            .arg("+inf")
            .query_async(&mut conn)
            .await?;
        Ok(live)
    }

    async fn write_record(&self, job: &Job, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(job)?;
        let _: () = redis::cmd("SET")
            .arg(self.keys.job(&job.id))
            .arg(json)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn create_record(&self, job: &Job, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(job)?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.keys.job(&job.id))
            .arg(json)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn read_record(&self, id: &str) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(self.keys.job(id)).await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.keys.job(id)).await?;
        Ok(())
    }

    async fn track_active(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(self.keys.active(), id).await?;
        Ok(())
    }

    async fn untrack_active(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(self.keys.active(), id).await?;
        Ok(())
    }

    async fn active_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.smembers(self.keys.active()).await?;
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl PoolStore for RedisStore {
    async fn push_entry(&self, entry: &PoolEntry) -> Result<u64> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(entry)?;
        let pair = format!("{}:{}", entry.requester_key, entry.subject_key);
        let _: i64 = conn.sadd(self.keys.pool_pairs(), pair).await?;
        let count: u64 = conn
            .rpush(self.keys.pool(&entry.requester_key, &entry.subject_key), json)
            .await?;
        Ok(count)
    }

    async fn pop_entry(
        &self,
        requester_key: &str,
        subject_key: &str,
    ) -> Result<Option<PoolEntry>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn
            .lpop(self.keys.pool(requester_key, subject_key), None)
            .await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn pool_count(&self, requester_key: &str, subject_key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(self.keys.pool(requester_key, subject_key)).await?)
    }

    async fn pool_total(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pairs: Vec<String> = conn.smembers(self.keys.pool_pairs()).await?;
        let mut total = 0u64;
        for pair in pairs {
            let Some((requester, subject)) = pair.split_once(':') else {
                continue;
            };
            let count: u64 = conn.llen(self.keys.pool(requester, subject)).await?;
            total += count;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let keys = KeySpace::default();
        assert_eq!(keys.job("abc"), "vanity:job:abc");
        assert_eq!(keys.pending(), "vanity:jobs:pending");
        assert_eq!(keys.in_progress(), "vanity:jobs:in_progress");
        assert_eq!(keys.active(), "vanity:jobs:active");
        assert_eq!(keys.pool("r", "s"), "vanity:pool:r:s");
        assert_eq!(keys.pool_pairs(), "vanity:pool:pairs");
    }

    #[test]
    fn namespace_prefixes_every_key() {
        let keys = KeySpace::new("test-1");
        assert!(keys.job("x").starts_with("test-1:"));
        assert!(keys.pool("a", "b").starts_with("test-1:"));
    }

    #[test]
    fn marker_replies_outside_zero_or_one_are_store_errors() {
        assert!(!marker_reply("claim", 0).unwrap());
        assert!(marker_reply("refresh", 1).unwrap());
        assert!(matches!(
            marker_reply("claim", 2),
            Err(VanityError::Store(msg)) if msg.contains("claim")
        ));
    }

    #[tokio::test]
    async fn connect_fails_for_bad_url() {
        let policy = RetryPolicy::fixed(1, 1);
        assert!(RedisStore::connect("not a url", &policy).await.is_err());
    }
}

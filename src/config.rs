use std::net::SocketAddr;
use std::time::Duration;

use crate::scheduler::job::JobStatus;

/// Mainnet program that owns the derived vanity mints.
pub const DEFAULT_PROGRAM_ID: &str = "29JgMGWZ28CSF7JLStKFp8xb4BZyf7QitG5CHcfRBYoR";

/// Worker admission settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between admission ticks
    pub tick_interval_ms: u64,
    /// Global ceiling on concurrently active searches (across all instances)
    pub max_concurrent: usize,
    /// Lifetime of an in-progress marker. Crash-safety net only.
    pub marker_ttl_secs: u64,
    /// Record lifetime while pending or active
    pub pending_ttl_secs: u64,
    pub completed_ttl_secs: u64,
    pub failed_ttl_secs: u64,
    /// Interval between reconciliation sweeps for stranded active jobs
    pub reconcile_interval_ms: u64,
    /// Attempt budget used when a submission does not name one
    pub default_max_attempts: u64,
    /// Upper bound accepted from submissions
    pub max_attempts_limit: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            max_concurrent: 2,
            marker_ttl_secs: 600,
            pending_ttl_secs: 7_200,
            completed_ttl_secs: 7_200,
            failed_ttl_secs: 3_600,
            reconcile_interval_ms: 60_000,
            default_max_attempts: 1_000_000,
            max_attempts_limit: 50_000_000,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn marker_ttl(&self) -> Duration {
        Duration::from_secs(self.marker_ttl_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Record lifetime for a job in `status`.
    pub fn record_ttl(&self, status: JobStatus) -> Duration {
        let secs = match status {
            JobStatus::Pending | JobStatus::Active => self.pending_ttl_secs,
            JobStatus::Completed => self.completed_ttl_secs,
            JobStatus::Failed => self.failed_ttl_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Address search engine settings.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Base-58 program identity used for derived addresses
    pub program_id: String,
    /// Candidates generated per batch
    pub batch_size: usize,
    /// The portable engine yields to the runtime after this many candidates
    pub yield_every: usize,
    /// Random seed bytes per derived-address candidate (1..=32)
    pub seed_len: usize,
    /// Use the multi-core engine when the host has more than one CPU
    pub prefer_parallel: bool,
    /// Scratch buffers kept by the engine's buffer pool
    pub pool_buffers: usize,
    /// Longest pattern accepted from submissions
    pub max_pattern_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            program_id: DEFAULT_PROGRAM_ID.to_string(),
            batch_size: 4_096,
            yield_every: 1_000,
            seed_len: 16,
            prefer_parallel: true,
            pool_buffers: 8,
            max_pattern_len: 8,
        }
    }
}

/// A (requester, subject) pair the pool warmer keeps stocked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolPair {
    pub requester_key: String,
    pub subject_key: String,
}

impl PoolPair {
    pub fn new(requester_key: impl Into<String>, subject_key: impl Into<String>) -> Self {
        Self {
            requester_key: requester_key.into(),
            subject_key: subject_key.into(),
        }
    }
}

/// Warm pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub check_interval_ms: u64,
    /// Refill is triggered when a pair holds fewer entries than this
    pub low_water: usize,
    /// Refill stops once a pair holds this many entries
    pub target: usize,
    /// Suffix every pooled address must carry
    pub pattern: String,
    /// Attempt budget for each pooled address
    pub attempts_per_entry: u64,
    /// Attempt budget for the synchronous fallback on a pool miss
    pub on_demand_attempts: u64,
    /// Consecutive exhausted searches before a refill gives up
    pub max_failed_rounds: u32,
    /// Pairs stocked from startup
    pub pairs: Vec<PoolPair>,
    /// Pairs tracked for refills, startup pairs included. Pairs first seen
    /// past this limit are served on demand only.
    pub max_tracked_pairs: usize,
    /// Refills searching at the same time across all pairs
    pub max_concurrent_refills: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 300_000,
            low_water: 5,
            target: 20,
            pattern: "r".to_string(),
            attempts_per_entry: 10_000,
            on_demand_attempts: 5_000,
            max_failed_rounds: 5,
            pairs: Vec::new(),
            max_tracked_pairs: 16,
            max_concurrent_refills: 1,
        }
    }
}

impl PoolConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn with_pair(mut self, requester_key: String, subject_key: String) -> Self {
        self.pairs.push(PoolPair::new(requester_key, subject_key));
        self
    }
}

/// Authentication and rate limiting in front of the submission and pool routes.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Accepted bearer tokens.
    pub tokens: Vec<String>,
    /// Admit requests without a token. Development only.
    pub allow_anonymous: bool,
    /// Requests a single submitter may make per window
    pub requests_per_window: u32,
    pub window_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            allow_anonymous: false,
            requests_per_window: 30,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Doubles the interval after every attempt, capped at `max_interval_ms`.
    Exponential { max_interval_ms: u64 },
}

/// Bounded retry schedule for polling and reconnect loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_ms: 500,
            backoff: Backoff::Exponential {
                max_interval_ms: 8_000,
            },
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            max_attempts,
            interval_ms,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay to wait after the given (zero-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => Duration::from_millis(self.interval_ms),
            Backoff::Exponential { max_interval_ms } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let ms = self.interval_ms.saturating_mul(factor).min(max_interval_ms);
                Duration::from_millis(ms)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// Redis connection string. `None` runs against the in-process store.
    pub redis_url: Option<String>,
    pub scheduler: SchedulerConfig,
    pub search: SearchConfig,
    pub pool: PoolConfig,
    pub gate: GateConfig,
    /// Used when connecting to the store
    pub connect_retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8080"
                .parse()
                .expect("default listen address is valid"),
            redis_url: None,
            scheduler: SchedulerConfig::default(),
            search: SearchConfig::default(),
            pool: PoolConfig::default(),
            gate: GateConfig::default(),
            connect_retry: RetryPolicy::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_redis(mut self, url: String) -> Self {
        self.redis_url = Some(url);
        self
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.gate.tokens.push(token);
        self
    }
}

//! Admission gate for the submission and pool routes.
//!
//! Authenticates a bearer token and applies a per-submitter sliding-window
//! rate limit before any job or pool state is touched.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::GateConfig;
use crate::error::{Result, VanityError};

pub const ANONYMOUS: &str = "anonymous";

pub struct AdmissionGate {
    config: GateConfig,
    /// Request times per submitter within the current window
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl AdmissionGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Authenticate and rate-limit one request. Returns the submitter
    /// identity recorded on jobs.
    pub async fn admit(&self, authorization: Option<&str>) -> Result<String> {
        let submitter = self.authenticate(authorization)?;
        self.rate_limit(&submitter).await?;
        Ok(submitter)
    }

    /// Resolve an `Authorization` header value to a submitter identity.
    ///
    /// Tokens are compared in constant time; the identity is a short digest
    /// so tokens never appear in records or logs.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<String> {
        let token = authorization.and_then(|value| value.strip_prefix("Bearer "));
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            if self.config.allow_anonymous {
                return Ok(ANONYMOUS.to_string());
            }
            return Err(VanityError::Unauthorized);
        };

        let known = self
            .config
            .tokens
            .iter()
            .fold(false, |found, t| found | constant_time_eq(t.as_bytes(), token.as_bytes()));
        if !known {
            tracing::warn!("Rejected request with unknown token");
            return Err(VanityError::Unauthorized);
        }
        Ok(submitter_id(token))
    }

    async fn rate_limit(&self, submitter: &str) -> Result<()> {
        let window = Duration::from_secs(self.config.window_secs.max(1));
        let limit = self.config.requests_per_window.max(1) as usize;
        let now = Instant::now();

        let mut windows = self.windows.lock().await;
        let hits = windows.entry(submitter.to_string()).or_default();
        while hits.front().is_some_and(|t| now.duration_since(*t) >= window) {
            hits.pop_front();
        }

        if hits.len() >= limit {
            let reset = hits
                .front()
                .map_or(window, |oldest| window.saturating_sub(now.duration_since(*oldest)));
            let retry_after_secs = reset.as_secs_f64().ceil().max(1.0) as u64;
            tracing::debug!(submitter, retry_after_secs, "Rate limited");
            return Err(VanityError::RateLimited { retry_after_secs });
        }
        hits.push_back(now);
        Ok(())
    }
}

fn submitter_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("token-{}", hex::encode(&digest[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(limit: u32) -> AdmissionGate {
        AdmissionGate::new(GateConfig {
            tokens: vec!["alpha".to_string(), "beta".to_string()],
            requests_per_window: limit,
            window_secs: 60,
            ..GateConfig::default()
        })
    }

    #[tokio::test]
    async fn rejects_missing_and_unknown_tokens() {
        let gate = gate(10);
        assert!(matches!(gate.admit(None).await, Err(VanityError::Unauthorized)));
        assert!(matches!(
            gate.admit(Some("Bearer gamma")).await,
            Err(VanityError::Unauthorized)
        ));
        assert!(matches!(
            gate.admit(Some("Basic alpha")).await,
            Err(VanityError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn known_tokens_map_to_stable_distinct_ids() {
        let gate = gate(10);
        let a1 = gate.admit(Some("Bearer alpha")).await.unwrap();
        let a2 = gate.admit(Some("Bearer alpha")).await.unwrap();
        let b = gate.admit(Some("Bearer beta")).await.unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert!(!a1.contains("alpha"));
    }

    #[tokio::test]
    async fn anonymous_allowed_when_configured() {
        let gate = AdmissionGate::new(GateConfig {
            allow_anonymous: true,
            ..GateConfig::default()
        });
        assert_eq!(gate.admit(None).await.unwrap(), ANONYMOUS);
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_limits_per_submitter() {
        let gate = gate(2);
        gate.admit(Some("Bearer alpha")).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        gate.admit(Some("Bearer alpha")).await.unwrap();

        let err = gate.admit(Some("Bearer alpha")).await.unwrap_err();
        assert!(matches!(err, VanityError::RateLimited { retry_after_secs: 40 }));

        // Another submitter has its own window.
        gate.admit(Some("Bearer beta")).await.unwrap();

        // The oldest request leaves the window after 60s.
        tokio::time::advance(Duration::from_secs(40)).await;
        gate.admit(Some("Bearer alpha")).await.unwrap();
    }
}

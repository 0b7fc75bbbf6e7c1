//! Vanity address search.
//!
//! Given a program identity, a requester and subject key and a target
//! pattern, the engine generates candidates until one renders to a matching
//! base-58 address or the attempt budget runs out.
//!
//! # Modes
//!
//! - [`SearchMode::Derived`]: vary a random seed and derive the program
//!   address of `["rift_mint", requester, subject, seed]`. No private key
//!   exists for the result; the seed and bump are returned.
//! - [`SearchMode::DirectKey`]: generate ed25519 secrets directly; the
//!   address is the public key and the secret is returned.
//!
//! # Engines
//!
//! [`PortableSearch`] runs on the async runtime and yields every
//! `yield_every` candidates. [`ParallelSearch`] evaluates each batch across a
//! rayon pool on the blocking thread pool. Both implement [`AddressSearch`]
//! and produce the same outcome shape; [`select_engine`] checks the host once
//! at startup.

pub mod base58;
pub mod buffers;
pub mod derive;
pub mod parallel;
pub mod pattern;
pub mod portable;

use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SearchConfig;
use crate::error::{Result, VanityError};

pub use buffers::BufferPool;
pub use parallel::ParallelSearch;
pub use pattern::{Pattern, PatternKind};
pub use portable::PortableSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Derived,
    DirectKey,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Derived => write!(f, "derived"),
            SearchMode::DirectKey => write!(f, "direct_key"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub program_id: String,
    pub requester_key: String,
    pub subject_key: String,
    pub pattern: String,
    #[serde(default)]
    pub pattern_kind: PatternKind,
    #[serde(default)]
    pub mode: SearchMode,
    pub max_attempts: u64,
}

/// What a caller needs to reproduce or use the found address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DerivationParams {
    Derived {
        /// Hex-encoded seed bytes
        seed: String,
        bump: u8,
        state_address: String,
        state_bump: u8,
    },
    DirectKey {
        /// Base-58 of the 64-byte keypair (secret ‖ public)
        secret_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub address: String,
    pub params: DerivationParams,
    pub attempts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(Match),
    Exhausted { attempts: u64 },
}

impl SearchOutcome {
    pub fn attempts(&self) -> u64 {
        match self {
            SearchOutcome::Found(m) => m.attempts,
            SearchOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

#[async_trait]
pub trait AddressSearch: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Run one search to a match or to exhaustion.
    ///
    /// Invalid keys or patterns are rejected before any candidate is tried.
    async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome>;
}

/// Pick the engine for this host: the multi-core engine when more than one
/// CPU is available and its thread pool starts, the portable one otherwise.
pub fn select_engine(config: &SearchConfig) -> Arc<dyn AddressSearch> {
    let cpus = num_cpus::get();
    if config.prefer_parallel && cpus > 1 {
        match ParallelSearch::new(config.clone(), cpus) {
            Ok(engine) => {
                tracing::info!(engine = engine.name(), threads = cpus, "Search engine selected");
                return Arc::new(engine);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Parallel search unavailable, using portable engine");
            }
        }
    }
    let engine = PortableSearch::new(config.clone());
    tracing::info!(engine = engine.name(), "Search engine selected");
    Arc::new(engine)
}

/// A request whose keys and pattern have been decoded and checked.
#[derive(Debug, Clone)]
pub struct PreparedSearch {
    program_id: [u8; 32],
    requester: [u8; 32],
    subject: [u8; 32],
    pattern: Pattern,
    mode: SearchMode,
    max_attempts: u64,
    seed_len: usize,
}

impl PreparedSearch {
    pub fn prepare(request: &SearchRequest, seed_len: usize) -> Result<Self> {
        if request.max_attempts == 0 {
            return Err(VanityError::InvalidRequest(
                "max_attempts must be positive".to_string(),
            ));
        }
        if seed_len == 0 || seed_len > derive::MAX_SEED_LEN {
            return Err(VanityError::InvalidRequest(format!(
                "seed length {} outside 1..={}",
                seed_len,
                derive::MAX_SEED_LEN
            )));
        }
        Ok(Self {
            program_id: base58::decode_key(&request.program_id)?,
            requester: base58::decode_key(&request.requester_key)?,
            subject: base58::decode_key(&request.subject_key)?,
            pattern: Pattern::new(&request.pattern, request.pattern_kind)?,
            mode: request.mode,
            max_attempts: request.max_attempts,
            seed_len,
        })
    }

    pub fn max_attempts(&self) -> u64 {
        self.max_attempts
    }

    /// Random bytes consumed per candidate.
    pub fn candidate_len(&self) -> usize {
        match self.mode {
            SearchMode::Derived => self.seed_len,
            SearchMode::DirectKey => 32,
        }
    }

    /// Expand a hit into the caller-facing match.
    fn into_match(&self, hit: Hit, attempts: u64) -> Result<Match> {
        let params = match self.mode {
            SearchMode::Derived => {
                let state = derive::state_address(
                    &self.program_id,
                    &self.requester,
                    &self.subject,
                    &hit.candidate,
                )?
                .ok_or_else(|| VanityError::Internal("no off-curve state address".to_string()))?;
                DerivationParams::Derived {
                    seed: hex::encode(&hit.candidate),
                    bump: hit.bump,
                    state_address: base58::encode(&state.address),
                    state_bump: state.bump,
                }
            }
            SearchMode::DirectKey => {
                let secret: [u8; 32] = hit
                    .candidate
                    .as_slice()
                    .try_into()
                    .map_err(|_| VanityError::Internal("secret is not 32 bytes".to_string()))?;
                let keypair = SigningKey::from_bytes(&secret).to_keypair_bytes();
                DerivationParams::DirectKey {
                    secret_key: base58::encode(&keypair),
                }
            }
        };
        Ok(Match {
            address: base58::encode(&hit.address),
            params,
            attempts,
        })
    }
}

/// A matching candidate before it is rendered for the caller.
#[derive(Debug, Clone)]
struct Hit {
    address: [u8; 32],
    bump: u8,
    candidate: Vec<u8>,
}

/// Per-worker candidate evaluation state.
struct Evaluator<'a> {
    search: &'a PreparedSearch,
    mint_prefix: Sha256,
    rendered: Vec<u8>,
}

impl<'a> Evaluator<'a> {
    fn new(search: &'a PreparedSearch) -> Self {
        Self {
            search,
            mint_prefix: derive::mint_prefix(&search.requester, &search.subject),
            rendered: Vec::with_capacity(base58::MAX_ENCODED_KEY_LEN),
        }
    }

    #[inline]
    fn evaluate(&mut self, candidate: &[u8]) -> Option<Hit> {
        let (address, bump) = match self.search.mode {
            SearchMode::Derived => {
                let mut hasher = self.mint_prefix.clone();
                hasher.update(candidate);
                let found = derive::find_from_prefix(&hasher, &self.search.program_id)?;
                (found.address, found.bump)
            }
            SearchMode::DirectKey => {
                let secret: &[u8; 32] = candidate.try_into().ok()?;
                (SigningKey::from_bytes(secret).verifying_key().to_bytes(), 0)
            }
        };

        base58::encode_into(&address, &base58::ALPHABET_LOWER, &mut self.rendered);
        self.search
            .pattern
            .matches_lowered(&self.rendered)
            .then(|| Hit {
                address,
                bump,
                candidate: candidate.to_vec(),
            })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::DEFAULT_PROGRAM_ID;

    pub fn key(byte: u8) -> String {
        base58::encode(&[byte; 32])
    }

    pub fn request(pattern: &str, mode: SearchMode, max_attempts: u64) -> SearchRequest {
        SearchRequest {
            program_id: DEFAULT_PROGRAM_ID.to_string(),
            requester_key: key(1),
            subject_key: key(2),
            pattern: pattern.to_string(),
            pattern_kind: PatternKind::Suffix,
            mode,
            max_attempts,
        }
    }
}

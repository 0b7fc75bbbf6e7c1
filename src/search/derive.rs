//! Program-derived addresses.
//!
//! An address is the SHA-256 of `seeds ‖ program_id ‖ "ProgramDerivedAddress"`
//! and is only valid when the digest is *not* an ed25519 point, so no private
//! key can exist for it. The canonical bump is the highest single-byte seed,
//! tried from 255 downward, that lands off the curve.

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha256};

use crate::error::{Result, VanityError};

pub const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";
pub const MAX_SEED_LEN: usize = 32;
pub const MAX_SEEDS: usize = 16;

/// Seed prefix of the vanity mint account.
pub const MINT_SEED: &[u8] = b"rift_mint";
/// Seed prefix of the state account created alongside the mint.
pub const STATE_SEED: &[u8] = b"rift";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramAddress {
    pub address: [u8; 32],
    pub bump: u8,
}

pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    CompressedEdwardsY(*bytes).decompress().is_some()
}

fn validate_seeds(seeds: &[&[u8]]) -> Result<()> {
    // One slot is reserved for the bump.
    if seeds.len() >= MAX_SEEDS {
        return Err(VanityError::InvalidRequest(format!(
            "at most {} seeds allowed",
            MAX_SEEDS - 1
        )));
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LEN) {
        return Err(VanityError::InvalidRequest(format!(
            "seed of {} bytes exceeds {} byte limit",
            seed.len(),
            MAX_SEED_LEN
        )));
    }
    Ok(())
}

/// Address for an explicit seed list (bump included), or `None` when the
/// digest lands on the curve.
pub fn create_program_address(seeds: &[&[u8]], program_id: &[u8; 32]) -> Result<Option<[u8; 32]>> {
    validate_seeds(seeds)?;
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    Ok(finish(hasher, program_id))
}

/// Canonical address and bump for a seed list.
pub fn find_program_address(seeds: &[&[u8]], program_id: &[u8; 32]) -> Result<Option<ProgramAddress>> {
    validate_seeds(seeds)?;
    let mut prefix = Sha256::new();
    for seed in seeds {
        prefix.update(seed);
    }
    Ok(find_from_prefix(&prefix, program_id))
}

/// Bump search over a hasher that has already absorbed every seed.
///
/// The search loop keeps the hasher state for the fixed seeds and clones it
/// per candidate instead of rehashing them.
#[inline]
pub fn find_from_prefix(prefix: &Sha256, program_id: &[u8; 32]) -> Option<ProgramAddress> {
    for bump in (0..=u8::MAX).rev() {
        let mut hasher = prefix.clone();
        hasher.update([bump]);
        if let Some(address) = finish(hasher, program_id) {
            return Some(ProgramAddress { address, bump });
        }
    }
    None
}

#[inline]
fn finish(mut hasher: Sha256, program_id: &[u8; 32]) -> Option<[u8; 32]> {
    hasher.update(program_id);
    hasher.update(PDA_MARKER);
    let digest: [u8; 32] = hasher.finalize().into();
    (!is_on_curve(&digest)).then_some(digest)
}

/// Hasher primed with the fixed mint seeds `["rift_mint", requester, subject]`.
pub fn mint_prefix(requester: &[u8; 32], subject: &[u8; 32]) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(MINT_SEED);
    hasher.update(requester);
    hasher.update(subject);
    hasher
}

/// Vanity mint address for a seed.
pub fn mint_address(
    program_id: &[u8; 32],
    requester: &[u8; 32],
    subject: &[u8; 32],
    seed: &[u8],
) -> Result<Option<ProgramAddress>> {
    find_program_address(&[MINT_SEED, requester, subject, seed], program_id)
}

/// State account derived from the same seed, with subject and requester swapped.
pub fn state_address(
    program_id: &[u8; 32],
    requester: &[u8; 32],
    subject: &[u8; 32],
    seed: &[u8],
) -> Result<Option<ProgramAddress>> {
    find_program_address(&[STATE_SEED, subject, requester, seed], program_id)
}

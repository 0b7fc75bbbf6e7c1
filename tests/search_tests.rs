use std::sync::Arc;

use vanity_lite::config::{SearchConfig, DEFAULT_PROGRAM_ID};
use vanity_lite::error::VanityError;
use vanity_lite::search::{
    base58, derive, AddressSearch, DerivationParams, ParallelSearch, PatternKind, PortableSearch,
    SearchMode, SearchOutcome, SearchRequest,
};

fn key(byte: u8) -> String {
    base58::encode(&[byte; 32])
}

fn config() -> SearchConfig {
    SearchConfig {
        batch_size: 512,
        yield_every: 128,
        ..SearchConfig::default()
    }
}

fn engines() -> Vec<Arc<dyn AddressSearch>> {
    vec![
        Arc::new(PortableSearch::new(config())),
        Arc::new(ParallelSearch::new(config(), 2).unwrap()),
    ]
}

fn request(pattern: &str, kind: PatternKind, mode: SearchMode, max_attempts: u64) -> SearchRequest {
    SearchRequest {
        program_id: DEFAULT_PROGRAM_ID.to_string(),
        requester_key: key(7),
        subject_key: key(9),
        pattern: pattern.to_string(),
        pattern_kind: kind,
        mode,
        max_attempts,
    }
}

#[test]
fn test_derived_address_is_deterministic() {
    let program = base58::decode_key(DEFAULT_PROGRAM_ID).unwrap();
    let seed = [0x5au8; 16];
    let first = derive::mint_address(&program, &[7; 32], &[9; 32], &seed)
        .unwrap()
        .unwrap();
    let second = derive::mint_address(&program, &[7; 32], &[9; 32], &seed)
        .unwrap()
        .unwrap();
    assert_eq!(first, second);
    assert!(!derive::is_on_curve(&first.address));

    // Any seed change moves the address.
    let other = derive::mint_address(&program, &[7; 32], &[9; 32], &[0x5b; 16])
        .unwrap()
        .unwrap();
    assert_ne!(first.address, other.address);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engines_find_reproducible_derived_match() {
    let program = base58::decode_key(DEFAULT_PROGRAM_ID).unwrap();
    for engine in engines() {
        let outcome = engine
            .search(&request("a", PatternKind::Suffix, SearchMode::Derived, 100_000))
            .await
            .unwrap();
        let SearchOutcome::Found(found) = outcome else {
            panic!("{} did not match a one-character suffix", engine.name());
        };
        assert!(found.address.to_ascii_lowercase().ends_with('a'));
        assert!(found.attempts >= 1 && found.attempts <= 100_000);

        let DerivationParams::Derived { seed, bump, .. } = found.params else {
            panic!("{} returned non-derived params", engine.name());
        };
        let seed = hex::decode(seed).unwrap();
        assert_eq!(seed.len(), config().seed_len);
        let again = derive::mint_address(&program, &[7; 32], &[9; 32], &seed)
            .unwrap()
            .unwrap();
        assert_eq!(base58::encode(&again.address), found.address);
        assert_eq!(again.bump, bump);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engines_match_prefix_in_direct_key_mode() {
    for engine in engines() {
        let outcome = engine
            .search(&request("b", PatternKind::Prefix, SearchMode::DirectKey, 100_000))
            .await
            .unwrap();
        let SearchOutcome::Found(found) = outcome else {
            panic!("{} did not match a one-character prefix", engine.name());
        };
        assert!(found.address.to_ascii_lowercase().starts_with('b'));
        let DerivationParams::DirectKey { secret_key } = found.params else {
            panic!("{} returned non-direct params", engine.name());
        };
        let keypair = base58::decode(&secret_key).unwrap();
        assert_eq!(base58::encode(&keypair[32..]), found.address);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_infeasible_pattern_exhausts_at_budget() {
    for engine in engines() {
        let outcome = engine
            .search(&request("zzzzzzzz", PatternKind::Suffix, SearchMode::Derived, 1_500))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::Exhausted { attempts: 1_500 },
            "{}",
            engine.name()
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_requests_fail_before_searching() {
    for engine in engines() {
        let mut bad_key = request("ab", PatternKind::Suffix, SearchMode::Derived, 10);
        bad_key.subject_key = key(1)[..20].to_string();
        assert!(matches!(
            engine.search(&bad_key).await,
            Err(VanityError::InvalidKey(_))
        ));

        let bad_pattern = request("a0b", PatternKind::Suffix, SearchMode::Derived, 10);
        assert!(matches!(
            engine.search(&bad_pattern).await,
            Err(VanityError::InvalidPattern(_))
        ));

        let no_budget = request("ab", PatternKind::Suffix, SearchMode::Derived, 0);
        assert!(matches!(
            engine.search(&no_budget).await,
            Err(VanityError::InvalidRequest(_))
        ));
    }
}

//! Property-based tests for the collapse, chunking and key-encoding layers.
//!
//! Uses proptest to generate arbitrary event bursts and malformed cache
//! entries and verify the invariants hold and nothing panics.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use presence_tracker::batching::dedup::{collapse_last_queued, collapse_latest};
use presence_tracker::model::{IdentityUpdate, LastSeen, LastSpoke};
use presence_tracker::storage::keys::{decode_name, decode_timestamp, parse_legacy_key};
use presence_tracker::storage::upsert::values_clause;
use presence_tracker::Chunker;

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Bursts over a small key space so collisions are common
fn last_seen_burst() -> impl Strategy<Value = Vec<LastSeen>> {
    prop::collection::vec(
        (0i64..20, any::<i64>()).prop_map(|(principal, at)| LastSeen { principal, at }),
        0..300,
    )
}

fn last_spoke_burst() -> impl Strategy<Value = Vec<LastSpoke>> {
    prop::collection::vec(
        (0i64..10, 0i64..4, 0i64..1_000_000)
            .prop_map(|(principal, scope, at)| LastSpoke { principal, scope, at }),
        0..300,
    )
}

fn identity_burst() -> impl Strategy<Value = Vec<IdentityUpdate>> {
    prop::collection::vec(
        (0i64..10, "[a-z]{1,6}", 0i64..1000)
            .prop_map(|(principal, name, at)| IdentityUpdate { principal, name, at }),
        0..200,
    )
}

// =============================================================================
// Collapse
// =============================================================================

proptest! {
    #[test]
    fn collapse_keeps_max_per_key(burst in last_seen_burst()) {
        let collapsed = collapse_latest(burst.clone());

        let mut expected: HashMap<i64, i64> = HashMap::new();
        for u in &burst {
            let slot = expected.entry(u.principal).or_insert(i64::MIN);
            *slot = (*slot).max(u.at);
        }

        prop_assert_eq!(collapsed.len(), expected.len());
        for u in &collapsed {
            prop_assert_eq!(Some(&u.at), expected.get(&u.principal));
        }
    }

    #[test]
    fn collapse_is_order_insensitive(burst in last_spoke_burst(), seed in any::<u64>()) {
        let mut shuffled = burst.clone();
        // Deterministic shuffle from the seed
        let n = shuffled.len();
        if n > 1 {
            let mut state = seed | 1;
            for i in (1..n).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                shuffled.swap(i, (state % (i as u64 + 1)) as usize);
            }
        }

        let as_map = |rows: Vec<LastSpoke>| -> HashMap<(i64, i64), i64> {
            rows.into_iter().map(|r| ((r.principal, r.scope), r.at)).collect()
        };
        prop_assert_eq!(as_map(collapse_latest(burst)), as_map(collapse_latest(shuffled)));
    }

    #[test]
    fn collapse_across_windows_is_monotonic(windows in prop::collection::vec(last_seen_burst(), 1..6)) {
        // Simulated durable tier: GREATEST(stored, incoming)
        let mut stored: HashMap<i64, i64> = HashMap::new();
        let mut max_ever: HashMap<i64, i64> = HashMap::new();

        for window in windows {
            for u in &window {
                let slot = max_ever.entry(u.principal).or_insert(i64::MIN);
                *slot = (*slot).max(u.at);
            }
            for u in collapse_latest(window) {
                let previous = stored.get(&u.principal).copied();
                let slot = stored.entry(u.principal).or_insert(u.at);
                *slot = (*slot).max(u.at);
                if let Some(previous) = previous {
                    prop_assert!(*slot >= previous);
                }
            }
        }

        prop_assert_eq!(stored, max_ever);
    }

    #[test]
    fn last_queued_identity_wins(burst in identity_burst()) {
        let collapsed = collapse_last_queued(burst.clone());

        let mut last: HashMap<i64, String> = HashMap::new();
        for u in &burst {
            last.insert(u.principal, u.name.clone());
        }

        let keys: HashSet<i64> = collapsed.iter().map(|u| u.principal).collect();
        prop_assert_eq!(keys.len(), collapsed.len());
        for u in &collapsed {
            prop_assert_eq!(Some(&u.name), last.get(&u.principal));
        }
    }
}

// =============================================================================
// Chunking
// =============================================================================

proptest! {
    #[test]
    fn chunks_respect_param_limit(rows in 0usize..5000, columns in 1usize..8, max_params in 1usize..40_000) {
        let chunker = Chunker::new(max_params);
        let data: Vec<usize> = (0..rows).collect();
        let per_statement = chunker.rows_per_statement(columns);

        let chunks: Vec<&[usize]> = chunker.chunks(&data, columns).collect();
        prop_assert_eq!(chunks.len(), chunker.statements_for(rows, columns));
        if rows > 0 {
            prop_assert_eq!(chunks.len(), (rows + per_statement - 1) / per_statement);
        }

        let mut seen = 0usize;
        for chunk in &chunks {
            prop_assert!(!chunk.is_empty());
            prop_assert!(chunk.len() <= per_statement);
            // A row wider than the limit still goes out one per statement
            prop_assert!(chunk.len() * columns <= max_params || chunk.len() == 1);
            for row in chunk.iter() {
                prop_assert_eq!(*row, seen);
                seen += 1;
            }
        }
        prop_assert_eq!(seen, rows);
    }

    #[test]
    fn values_clause_binds_every_param_once(rows in 1usize..50, columns in 1usize..6) {
        let clause = values_clause(rows, columns);
        let placeholders = clause.matches('$').count();
        prop_assert_eq!(placeholders, rows * columns);
        let last = format!("${})", rows * columns);
        prop_assert!(clause.ends_with(&last));
    }
}

// =============================================================================
// Cache entry decoding never panics
// =============================================================================

proptest! {
    #[test]
    fn decode_name_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..200)) {
        let _ = decode_name("fuzz", &bytes);
    }

    #[test]
    fn decode_timestamp_only_accepts_eight_bytes(bytes in prop::collection::vec(any::<u8>(), 0..20)) {
        prop_assert_eq!(decode_timestamp("fuzz", &bytes).is_ok(), bytes.len() == 8);
    }

    #[test]
    fn parse_legacy_key_never_panics(key in ".{0,40}") {
        let _ = parse_legacy_key(&key);
    }

    #[test]
    fn parse_legacy_key_roundtrips_numeric_keys(principal in any::<i64>(), scope in 1i64..i64::MAX) {
        use presence_tracker::storage::keys::{legacy_last_spoke_key, LegacyKey};
        prop_assert_eq!(
            parse_legacy_key(&legacy_last_spoke_key(principal, scope)),
            Some(LegacyKey::LastSpoke(principal, scope))
        );
    }
}

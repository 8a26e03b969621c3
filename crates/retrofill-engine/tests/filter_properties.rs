use std::collections::BTreeMap;

use proptest::prelude::*;
use retrofill_engine::filter::{Constraint, DedupState, FilterDecision};
use retrofill_engine::testing::source_record;
use retrofill_engine::RecordFilter;
use retrofill_sdk::prelude::*;
use serde_json::json;

fn filter() -> RecordFilter {
    RecordFilter::new(
        "key",
        vec![Constraint::new("cycle", FilterOp::Eq, json!(1))],
        BTreeMap::from([("key".to_string(), "key".to_string())]),
    )
}

/// Records with keys drawn from a small pool so duplicates are common.
fn page() -> impl Strategy<Value = Vec<SourceRecord>> {
    prop::collection::vec((0u8..20, 0u8..3, prop::bool::weighted(0.05)), 0..200).prop_map(
        |rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (key, cycle, keyless))| {
                    let body = if keyless {
                        json!({"cycle": cycle})
                    } else {
                        json!({"key": format!("k{key}"), "cycle": cycle})
                    };
                    source_record(&format!("r{i:04}"), json!(i), body)
                })
                .collect()
        },
    )
}

proptest! {
    #[test]
    fn every_record_lands_in_exactly_one_bucket(records in page()) {
        let mut dedup = DedupState::new();
        let out = filter().apply(&records, &mut dedup);
        prop_assert_eq!(out.counts.total(), records.len() as u64);
        prop_assert_eq!(out.accepted.len() as u64, out.counts.accepted);
        prop_assert_eq!(dedup.len(), out.accepted.len());
    }

    #[test]
    fn same_state_same_partition(records in page(), seed in page()) {
        let f = filter();
        let mut base = DedupState::new();
        f.apply(&seed, &mut base);

        let mut first = base.clone();
        let mut second = base.clone();
        prop_assert_eq!(f.apply(&records, &mut first), f.apply(&records, &mut second));
    }

    #[test]
    fn seen_key_is_always_a_duplicate(key in 0u8..20, cycle in 0u8..3) {
        let f = filter();
        let mut dedup = DedupState::new();
        dedup.insert(format!("k{key}"));
        let record = source_record("r", json!(0), json!({"key": format!("k{key}"), "cycle": cycle}));
        prop_assert_eq!(f.decide(&record, &mut dedup), FilterDecision::Duplicate);
    }

    #[test]
    fn accepted_keys_are_unique(records in page()) {
        let mut dedup = DedupState::new();
        let f = filter();
        let half = records.len() / 2;
        let mut keys: Vec<String> = f.apply(&records[..half], &mut dedup)
            .accepted
            .into_iter()
            .chain(f.apply(&records[half..], &mut dedup).accepted)
            .map(|r| r.dedup_key)
            .collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), total);
    }
}

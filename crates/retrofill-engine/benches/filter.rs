//! Criterion benchmarks for the filter and dedup stage.
//!
//! One page is filtered against a dedup state that already carries keys from
//! earlier pages, which is the steady state of a long run.

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use retrofill_engine::filter::{Constraint, DedupState};
use retrofill_engine::testing::source_record;
use retrofill_engine::RecordFilter;
use retrofill_sdk::prelude::*;
use serde_json::json;

fn subscription_filter() -> RecordFilter {
    RecordFilter::new(
        "parentAutopayId",
        vec![
            Constraint::new("autopayInfo.deductionMonth", FilterOp::Eq, json!("October_2025")),
            Constraint::new("autopayInfo.cycle", FilterOp::Eq, json!(1)),
        ],
        BTreeMap::from([
            ("parentAutopayId".to_string(), "parentAutopayId".to_string()),
            ("deductionMonth".to_string(), "autopayInfo.deductionMonth".to_string()),
            ("cycle".to_string(), "autopayInfo.cycle".to_string()),
        ]),
    )
}

fn page(size: usize, offset: usize) -> Vec<SourceRecord> {
    (offset..offset + size)
        .map(|i| {
            source_record(
                &format!("doc-{i:06}"),
                json!(i),
                json!({
                    "parentAutopayId": format!("ap-{}", i % (size * 3 / 4).max(1)),
                    "amount": i * 10,
                    "autopayInfo": {
                        "cycle": 1 + i % 3,
                        "deductionMonth": "October_2025",
                    },
                }),
            )
        })
        .collect()
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter/apply");
    let filter = subscription_filter();

    for size in [100usize, 1_000, 10_000] {
        let records = page(size, size);
        let mut warm = DedupState::new();
        filter.apply(&page(size, 0), &mut warm);

        group.bench_with_input(BenchmarkId::new("page", size), &records, |b, records| {
            b.iter_batched(
                || warm.clone(),
                |mut dedup| black_box(filter.apply(records, &mut dedup)),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_apply);
criterion_main!(benches);

//! Criterion benchmarks for the SQLite state backend.
//!
//! These measure the run lifecycle and dead-letter inserts that happen on
//! every pipeline execution.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use retrofill_state::prelude::*;
use retrofill_types::error::ErrorCategory;

fn bench_run_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/run_lifecycle");

    group.bench_function("start_and_complete", |b| {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let pipeline = PipelineId::new("bench_pipeline");
        let stats = RunStats {
            pages_processed: 2,
            records_fetched: 1500,
            records_accepted: 1400,
            writes_succeeded: 1400,
            ..RunStats::default()
        };

        b.iter(|| {
            let run_id = backend.start_run(&pipeline).unwrap();
            backend
                .complete_run(run_id, RunStatus::Completed, &stats, None)
                .unwrap();
        });
    });

    group.finish();
}

fn bench_insert_dlq(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/insert_dlq");

    for batch in [1usize, 100, 500] {
        group.bench_with_input(BenchmarkId::new("records", batch), &batch, |b, &batch| {
            let backend = SqliteStateBackend::in_memory().unwrap();
            let pipeline = PipelineId::new("bench_pipeline");
            let run_id = backend.start_run(&pipeline).unwrap();
            let records: Vec<DlqRecord> = (0..batch)
                .map(|i| DlqRecord {
                    collection: "retries".to_string(),
                    record_json: format!(r#"{{"parentAutopayId":"ap-{i}","cycle":1}}"#),
                    error_message: "database is locked".to_string(),
                    error_category: ErrorCategory::TransientDb,
                    group_index: Some(0),
                    failed_at: Timestamp::new("2026-02-21T12:00:00Z"),
                })
                .collect();

            b.iter(|| backend.insert_dlq_records(&pipeline, run_id, &records).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_run_lifecycle, bench_insert_dlq);
criterion_main!(benches);

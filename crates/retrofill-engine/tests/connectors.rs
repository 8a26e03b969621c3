//! Full runs through `run_pipeline` with the SQLite and JSONL connectors.

use std::io::Write;
use std::path::Path;

use retrofill_engine::config::parse_pipeline_str;
use retrofill_engine::{check_pipeline, run_pipeline, ExecutionOptions, PipelineError, RunOutcome};
use retrofill_state::{SqliteStateBackend, StateBackend};
use retrofill_types::state::{PipelineId, RunStatus};
use rusqlite::{params, Connection};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn seed_source(path: &Path, rows: usize) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE documents (id TEXT PRIMARY KEY, created_at TEXT NOT NULL, body TEXT NOT NULL);",
    )
    .unwrap();
    let mut stmt = conn
        .prepare("INSERT INTO documents (id, created_at, body) VALUES (?1, ?2, ?3)")
        .unwrap();
    // Each day holds one row per key; the Oct 2 rows are all cycle 2.
    for i in 0..rows {
        let day = 1 + i / 40;
        let created_at = format!("2025-10-{day:02}T00:00:00Z");
        let body = json!({
            "createdAt": created_at,
            "parentAutopayId": format!("ap-{}", i % 40),
            "autopayInfo": {
                "cycle": if day == 2 { 2 } else { 1 },
                "deductionMonth": "October_2025",
            },
        });
        stmt.execute(params![format!("doc-{i:04}"), created_at, body.to_string()])
            .unwrap();
    }
}

fn yaml(dir: &Path, source: &str, write_mode: &str) -> String {
    format!(
        r#"
version: "1.0"
pipeline: subscription-retries
source:
  {source}
  order_by: createdAt
  filters:
    - {{ field: createdAt, op: gte, value: "2025-10-02T00:00:00Z" }}
filter:
  dedup_key: parentAutopayId
  constraints:
    - {{ field: autopayInfo.deductionMonth, op: eq, value: October_2025 }}
    - {{ field: autopayInfo.cycle, op: eq, value: 1 }}
destination:
  use: dest-sqlite
  config: {{ path: "{dest}" }}
  collection: subscription_retries
  fields:
    parentAutopayId: parentAutopayId
    cycle: autopayInfo.cycle
    sourceId: $id
  write_mode: {write_mode}
  group_size: 10
resources:
  page_size: 25
state:
  backend: sqlite
  connection: "{state}"
"#,
        dest = dir.join("dest.db").display(),
        state = dir.join("state.db").display(),
    )
}

fn sqlite_source(dir: &Path) -> String {
    let db = dir.join("source.db");
    seed_source(&db, 200);
    format!("use: source-sqlite\n  config: {{ path: \"{}\" }}", db.display())
}

fn dest_rows(dir: &Path) -> i64 {
    let conn = Connection::open(dir.join("dest.db")).unwrap();
    conn.query_row("SELECT COUNT(*) FROM subscription_retries", [], |r| r.get(0))
        .unwrap()
}

#[tokio::test]
async fn sqlite_to_sqlite_records_run_history() {
    let dir = TempDir::new().unwrap();
    let config =
        parse_pipeline_str(&yaml(dir.path(), &sqlite_source(dir.path()), "grouped")).unwrap();

    let report = run_pipeline(&config, &ExecutionOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.outcome, RunOutcome::Completed));
    assert_eq!(report.stats.records_fetched, 160);
    assert_eq!(report.stats.constraint_rejected, 40);
    assert_eq!(report.stats.records_accepted, 40);
    assert_eq!(report.stats.duplicates_rejected, 80);
    assert_eq!(report.stats.pages_processed, 7);
    assert_eq!(dest_rows(dir.path()), 40);

    let state = SqliteStateBackend::open(&dir.path().join("state.db")).unwrap();
    let runs = state
        .list_runs(&PipelineId::new("subscription-retries"), 10)
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(Some(runs[0].id), report.run_id);
    assert_eq!(runs[0].stats.as_ref().unwrap().records_accepted, 40);
}

#[tokio::test]
async fn failed_writes_land_in_the_dead_letter_table() {
    let dir = TempDir::new().unwrap();
    let config =
        parse_pipeline_str(&yaml(dir.path(), &sqlite_source(dir.path()), "individual")).unwrap();
    // Pre-create the collection with a trigger rejecting two keys.
    {
        let conn = Connection::open(dir.path().join("dest.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE subscription_retries (id TEXT PRIMARY KEY, created_at TEXT NOT NULL, body TEXT NOT NULL);
             CREATE TRIGGER reject BEFORE INSERT ON subscription_retries
             WHEN json_extract(NEW.body, '$.parentAutopayId') IN ('ap-1', 'ap-2')
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
    }

    let report = run_pipeline(&config, &ExecutionOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(report.stats.writes_failed, 2);
    assert_eq!(report.stats.writes_succeeded, 38);
    assert_eq!(report.dlq_records, 2);
    assert_eq!(dest_rows(dir.path()), 38);

    let conn = Connection::open(dir.path().join("state.db")).unwrap();
    let keys: Vec<String> = conn
        .prepare("SELECT json_extract(record_json, '$.parentAutopayId') FROM dlq_records ORDER BY 1")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(keys, ["ap-1", "ap-2"]);
}

#[tokio::test]
async fn jsonl_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let export = dir.path().join("export.jsonl");
    let mut file = std::fs::File::create(&export).unwrap();
    for i in 0..60 {
        let line = json!({
            "id": format!("doc-{i:03}"),
            "createdAt": format!("2025-10-0{}T00:00:00Z", 2 + i % 3),
            "parentAutopayId": format!("ap-{i}"),
            "autopayInfo": {"cycle": 1, "deductionMonth": "October_2025"},
        });
        writeln!(file, "{line}").unwrap();
    }
    writeln!(file, "{}", json!({"createdAt": "2025-10-03T00:00:00Z"})).unwrap();
    drop(file);

    let source = format!("use: source-jsonl\n  config: {{ path: \"{}\" }}", export.display());
    let config = parse_pipeline_str(&yaml(dir.path(), &source, "grouped")).unwrap();
    let options = ExecutionOptions {
        dry_run: true,
        max_pages: None,
    };

    let report = run_pipeline(&config, &options, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.dry_run);
    assert!(report.run_id.is_none());
    assert_eq!(report.stats.records_fetched, 60);
    assert_eq!(report.stats.records_accepted, 60);
    assert_eq!(report.stats.writes_succeeded, 60);
    assert_eq!(report.stats.pages_processed, 3);
    assert!(!dir.path().join("dest.db").exists());
    assert!(!dir.path().join("state.db").exists());
}

#[tokio::test]
async fn page_limit_and_cancellation_are_recorded() {
    let dir = TempDir::new().unwrap();
    let config =
        parse_pipeline_str(&yaml(dir.path(), &sqlite_source(dir.path()), "individual")).unwrap();

    let limited = run_pipeline(
        &config,
        &ExecutionOptions {
            dry_run: false,
            max_pages: Some(2),
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(limited.is_completed());
    assert_eq!(limited.stats.records_fetched, 50);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let cancelled = run_pipeline(&config, &ExecutionOptions::default(), cancel)
        .await
        .unwrap();
    assert!(matches!(cancelled.outcome, RunOutcome::Cancelled));
    assert_eq!(cancelled.stats.pages_processed, 0);

    let state = SqliteStateBackend::open(&dir.path().join("state.db")).unwrap();
    let runs = state
        .list_runs(&PipelineId::new("subscription-retries"), 10)
        .unwrap();
    let statuses: Vec<_> = runs.iter().map(|r| r.status).collect();
    assert_eq!(statuses, [RunStatus::Cancelled, RunStatus::Completed]);
}

#[tokio::test]
async fn configuration_errors_surface_before_any_run() {
    let dir = TempDir::new().unwrap();
    let source = format!(
        "use: source-jsonl\n  config: {{ path: \"{}\" }}",
        dir.path().join("missing.jsonl").display()
    );
    let config = parse_pipeline_str(&yaml(dir.path(), &source, "individual")).unwrap();

    let err = run_pipeline(&config, &ExecutionOptions::default(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(_)));
    assert!(!dir.path().join("state.db").exists());

    let other = TempDir::new().unwrap();
    let mut oversized =
        parse_pipeline_str(&yaml(other.path(), &sqlite_source(other.path()), "grouped")).unwrap();
    oversized.destination.group_size = 501;
    let err = run_pipeline(&oversized, &ExecutionOptions::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("atomic cap")));
}

#[tokio::test]
async fn check_reports_each_component() {
    let dir = TempDir::new().unwrap();
    let config =
        parse_pipeline_str(&yaml(dir.path(), &sqlite_source(dir.path()), "grouped")).unwrap();

    let result = check_pipeline(&config).await.unwrap();

    assert!(result.is_ok());
    assert!(result.source_validation.message.contains("200 rows"));

    let mut broken = config.clone();
    broken.source.config = json!({"path": dir.path().join("absent.db")});
    let result = check_pipeline(&broken).await.unwrap();
    assert!(!result.source_validation.is_success());
    assert!(result.destination_validation.is_success());
    assert!(!result.is_ok());
}

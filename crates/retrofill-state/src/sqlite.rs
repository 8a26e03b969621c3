//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use retrofill_types::envelope::DlqRecord;
use retrofill_types::state::{PipelineId, RunRecord, RunStats, RunStatus};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    stats_json TEXT,
    last_cursor TEXT,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS dlq_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    collection TEXT NOT NULL,
    record_json TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_category TEXT NOT NULL,
    group_index INTEGER,
    failed_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs (pipeline, id);
CREATE INDEX IF NOT EXISTS idx_dlq_pipeline_run ON dlq_records (pipeline, run_id);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn =
            Connection::open(path).map_err(|e| StateError::backend_context("open", e))?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` backend (for testing and dry runs).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the database can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StateError::backend_context("open_in_memory", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("create_tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    #[cfg(test)]
    fn count_dlq_records_for_run(&self, pipeline: &PipelineId, run_id: i64) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM dlq_records WHERE pipeline = ?1 AND run_id = ?2",
            rusqlite::params![pipeline.as_str(), run_id],
            |row| row.get(0),
        )
        .map_err(|e| StateError::backend_context("count_dlq_records", e))
    }

    #[cfg(test)]
    fn last_cursor(&self, run_id: i64) -> error::Result<Option<String>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT last_cursor FROM runs WHERE id = ?1",
            [run_id],
            |row| row.get(0),
        )
        .optional()
        .map(Option::flatten)
        .map_err(|e| StateError::backend_context("last_cursor", e))
    }
}

impl StateBackend for SqliteStateBackend {
    fn start_run(&self, pipeline: &PipelineId) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO runs (pipeline, status) VALUES (?1, ?2)",
            rusqlite::params![pipeline.as_str(), RunStatus::Running.as_str()],
        )
        .map_err(|e| StateError::backend_context("start_run", e))?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        stats: &RunStats,
        error_message: Option<&str>,
    ) -> error::Result<()> {
        let stats_json = serde_json::to_string(stats)?;
        let last_cursor = stats
            .last_cursor
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE runs SET status = ?1, finished_at = datetime('now'), \
             stats_json = ?2, last_cursor = ?3, error_message = ?4 \
             WHERE id = ?5",
            rusqlite::params![status.as_str(), stats_json, last_cursor, error_message, run_id],
        )
        .map_err(|e| StateError::backend_context("complete_run", e))?;
        Ok(())
    }

    fn insert_dlq_records(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        records: &[DlqRecord],
    ) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("insert_dlq_records: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO dlq_records \
                 (pipeline, run_id, collection, record_json, error_message, error_category, \
                  group_index, failed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(|e| StateError::backend_context("insert_dlq_records: prepare", e))?;

        let mut count = 0u64;
        for record in records {
            stmt.execute(rusqlite::params![
                pipeline.as_str(),
                run_id,
                record.collection,
                record.record_json,
                record.error_message,
                record.error_category.to_string(),
                record.group_index,
                record.failed_at.as_str(),
            ])
            .map_err(|e| StateError::backend_context("insert_dlq_records: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_dlq_records: commit", e))?;

        Ok(count)
    }

    fn list_runs(&self, pipeline: &PipelineId, limit: usize) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, status, started_at, finished_at, stats_json, error_message \
                 FROM runs WHERE pipeline = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| StateError::backend_context("list_runs: prepare", e))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(rusqlite::params![pipeline.as_str(), limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(|e| StateError::backend_context("list_runs: query", e))?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, status, started_at, finished_at, stats_json, error_message) =
                row.map_err(|e| StateError::backend_context("list_runs: row", e))?;
            let stats = stats_json
                .as_deref()
                .map(serde_json::from_str::<RunStats>)
                .transpose()?;
            runs.push(RunRecord {
                id,
                pipeline: pipeline.clone(),
                status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
                started_at: Self::sqlite_to_iso8601(&started_at),
                finished_at: finished_at.as_deref().map(Self::sqlite_to_iso8601),
                stats,
                error_message,
            });
        }
        Ok(runs)
    }
}

//! `Destination` implementation over a `SQLite` collection table.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use retrofill_sdk::prelude::*;
use rusqlite::{params, Connection};

use crate::config::Config;

/// Append-only writer for one collection table.
pub struct SqliteDestination {
    conn: Arc<Mutex<Connection>>,
    insert_sql: Arc<str>,
    collection: String,
    max_group_size: usize,
}

/// Quote any table name, doubling embedded quotes.
fn quote_table(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn new_document_id() -> DocumentId {
    uuid::Uuid::new_v4().to_string()
}

fn write_error(e: &rusqlite::Error) -> ConnectorError {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                ConnectorError::transient_db("DATABASE_BUSY", e.to_string())
            }
            rusqlite::ErrorCode::ConstraintViolation => {
                ConnectorError::data("CONSTRAINT_VIOLATION", e.to_string())
            }
            rusqlite::ErrorCode::DiskFull => ConnectorError::quota("DISK_FULL", e.to_string()),
            _ => ConnectorError::internal("WRITE_FAILED", e.to_string()),
        },
        _ => ConnectorError::internal("WRITE_FAILED", e.to_string()),
    }
}

fn encode(record: &DerivedRecord) -> Result<String, ConnectorError> {
    serde_json::to_string(&record.fields)
        .map_err(|e| ConnectorError::data("ENCODE_FAILED", e.to_string()))
}

impl SqliteDestination {
    /// Open (or create) the database and ensure the collection table exists.
    ///
    /// # Errors
    ///
    /// Returns a config error when the collection name is empty or the
    /// database cannot be opened or initialised.
    pub fn open(config: &Config, collection: &str) -> Result<Self, ConnectorError> {
        config.validate()?;
        if collection.trim().is_empty() {
            return Err(ConnectorError::config(
                "MISSING_COLLECTION",
                "destination collection name must not be empty",
            ));
        }
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConnectorError::config(
                    "OPEN_FAILED",
                    format!("cannot create {}: {e}", parent.display()),
                )
            })?;
        }
        let conn = Connection::open(&config.path).map_err(|e| {
            ConnectorError::config(
                "OPEN_FAILED",
                format!("cannot open {}: {e}", config.path.display()),
            )
        })?;
        Self::init(conn, config, collection)
    }

    /// In-memory destination, mainly for tests and dry inspection.
    ///
    /// # Errors
    ///
    /// Returns a config error if the table cannot be created.
    pub fn in_memory(config: &Config, collection: &str) -> Result<Self, ConnectorError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ConnectorError::config("OPEN_FAILED", e.to_string()))?;
        Self::init(conn, config, collection)
    }

    fn init(conn: Connection, config: &Config, collection: &str) -> Result<Self, ConnectorError> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| ConnectorError::config("OPEN_FAILED", e.to_string()))?;
        let table = quote_table(collection);
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            );"
        ))
        .map_err(|e| {
            ConnectorError::config(
                "DDL_FAILED",
                format!("cannot create collection '{collection}': {e}"),
            )
        })?;

        tracing::debug!(
            collection,
            max_group_size = config.max_group_size,
            "Opened SQLite destination"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            insert_sql: format!("INSERT INTO {table} (id, created_at, body) VALUES (?1, ?2, ?3)")
                .into(),
            collection: collection.to_string(),
            max_group_size: config.max_group_size,
        })
    }

    /// Number of entries in the collection.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the count query fails.
    pub fn count(&self) -> Result<u64, ConnectorError> {
        count_entries(&self.conn, &self.collection)
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

fn lock_error() -> ConnectorError {
    ConnectorError::internal("LOCK_POISONED", "destination connection mutex poisoned")
}

fn join_error(e: &tokio::task::JoinError) -> ConnectorError {
    ConnectorError::internal("TASK_FAILED", e.to_string())
}

impl Destination for SqliteDestination {
    async fn create(&self, record: &DerivedRecord) -> Result<DocumentId, ConnectorError> {
        let body = encode(record)?;
        let conn = Arc::clone(&self.conn);
        let sql = Arc::clone(&self.insert_sql);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| lock_error())?;
            let id = new_document_id();
            conn.prepare_cached(&sql)
                .and_then(|mut stmt| stmt.execute(params![id, now_rfc3339(), body]))
                .map_err(|e| write_error(&e))?;
            Ok::<_, ConnectorError>(id)
        })
        .await
        .map_err(|e| join_error(&e))?
    }

    async fn create_group(
        &self,
        records: &[DerivedRecord],
    ) -> Result<Vec<DocumentId>, ConnectorError> {
        if records.len() > self.max_group_size {
            return Err(ConnectorError::quota(
                "GROUP_TOO_LARGE",
                format!(
                    "group of {} exceeds atomic cap {}",
                    records.len(),
                    self.max_group_size
                ),
            ));
        }
        let bodies = records.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        let conn = Arc::clone(&self.conn);
        let sql = Arc::clone(&self.insert_sql);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| lock_error())?;
            let tx = conn.transaction().map_err(|e| write_error(&e))?;
            let created_at = now_rfc3339();
            let mut ids = Vec::with_capacity(bodies.len());
            {
                let mut stmt = tx.prepare_cached(&sql).map_err(|e| write_error(&e))?;
                for body in &bodies {
                    let id = new_document_id();
                    stmt.execute(params![id, created_at, body])
                        .map_err(|e| write_error(&e))?;
                    ids.push(id);
                }
            }
            // Dropping `tx` without commit rolls the whole group back.
            tx.commit().map_err(|e| write_error(&e))?;
            Ok::<_, ConnectorError>(ids)
        })
        .await
        .map_err(|e| join_error(&e))?
    }

    fn max_group_size(&self) -> usize {
        self.max_group_size
    }

    async fn check(&self) -> Result<ValidationResult, ConnectorError> {
        let conn = Arc::clone(&self.conn);
        let collection = self.collection.clone();
        tokio::task::spawn_blocking(move || {
            let count = count_entries(&conn, &collection)?;
            Ok(ValidationResult::success(format!(
                "collection '{collection}' writable, {count} entries"
            )))
        })
        .await
        .map_err(|e| join_error(&e))?
    }
}

fn count_entries(conn: &Mutex<Connection>, collection: &str) -> Result<u64, ConnectorError> {
    let conn = conn.lock().map_err(|_| lock_error())?;
    let count: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_table(collection)),
            [],
            |r| r.get(0),
        )
        .map_err(|e| write_error(&e))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use std::time::Instant;

    fn config(max_group_size: usize) -> Config {
        Config {
            path: "unused.db".into(),
            max_group_size,
            busy_timeout_ms: 100,
        }
    }

    fn derived(key: &str) -> DerivedRecord {
        let Value::Object(fields) = json!({"parentAutopayId": key, "cycle": 2}) else {
            unreachable!()
        };
        DerivedRecord {
            source_id: format!("src-{key}"),
            dedup_key: key.to_string(),
            fields,
        }
    }

    fn reject_marker(dest: &SqliteDestination, marker: &str) {
        let conn = dest.conn.lock().unwrap();
        conn.execute_batch(&format!(
            "CREATE TRIGGER reject BEFORE INSERT ON {} \
             WHEN json_extract(NEW.body, '$.parentAutopayId') = '{marker}' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            quote_table(&dest.collection)
        ))
        .unwrap();
    }

    fn stored_bodies(dest: &SqliteDestination) -> Vec<Map<String, Value>> {
        let conn = dest.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT body FROM {} ORDER BY rowid",
                quote_table(&dest.collection)
            ))
            .unwrap();
        stmt.query_map([], |r| r.get::<_, String>(0))
            .unwrap()
            .map(|b| serde_json::from_str(&b.unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn create_assigns_uuid_and_stores_only_fields() {
        let dest = SqliteDestination::in_memory(&config(500), "subscription-retries").unwrap();
        let id = dest.create(&derived("ap-1")).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        let bodies = stored_bodies(&dest);
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["parentAutopayId"], json!("ap-1"));
        assert!(!bodies[0].contains_key("source_id"));
    }

    #[tokio::test]
    async fn group_commits_every_record() {
        let dest = SqliteDestination::in_memory(&config(500), "retries").unwrap();
        let records: Vec<_> = (0..25).map(|i| derived(&format!("ap-{i}"))).collect();
        let ids = dest.create_group(&records).await.unwrap();
        assert_eq!(ids.len(), 25);
        assert_eq!(dest.count().unwrap(), 25);
    }

    #[tokio::test]
    async fn failing_group_commits_nothing() {
        let dest = SqliteDestination::in_memory(&config(500), "retries").unwrap();
        reject_marker(&dest, "ap-3");
        let records: Vec<_> = (0..5).map(|i| derived(&format!("ap-{i}"))).collect();
        let err = dest.create_group(&records).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Data);
        assert_eq!(dest.count().unwrap(), 0);

        // Connection is still usable afterwards.
        dest.create_group(&records[..3]).await.unwrap();
        assert_eq!(dest.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn oversized_group_is_refused() {
        let dest = SqliteDestination::in_memory(&config(2), "retries").unwrap();
        let records: Vec<_> = (0..3).map(|i| derived(&format!("ap-{i}"))).collect();
        let err = dest.create_group(&records).await.unwrap_err();
        assert_eq!(err.code, "GROUP_TOO_LARGE");
        assert_eq!(dest.count().unwrap(), 0);
        assert_eq!(dest.max_group_size(), 2);
    }

    #[tokio::test]
    async fn individual_failure_leaves_other_writes() {
        let dest = SqliteDestination::in_memory(&config(500), "retries").unwrap();
        reject_marker(&dest, "bad");
        dest.create(&derived("good-1")).await.unwrap();
        assert!(dest.create(&derived("bad")).await.is_err());
        dest.create(&derived("good-2")).await.unwrap();
        assert_eq!(dest.count().unwrap(), 2);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            path: dir.path().join("nested/dest.db"),
            ..config(500)
        };
        let dest = SqliteDestination::open(&cfg, "retries").unwrap();
        assert!(cfg.path.exists());
        assert_eq!(dest.collection(), "retries");
    }

    #[test]
    fn empty_collection_rejected() {
        let err = SqliteDestination::open(&config(500), " ").err().unwrap();
        assert_eq!(err.code, "MISSING_COLLECTION");
    }

    #[tokio::test]
    async fn check_reports_entries() {
        let dest = SqliteDestination::in_memory(&config(500), "retries").unwrap();
        dest.create(&derived("ap-1")).await.unwrap();
        let result = dest.check().await.unwrap();
        assert!(result.message.contains("1 entries"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn check_does_not_block_while_a_write_holds_the_connection() {
        let dest = SqliteDestination::in_memory(&config(500), "retries").unwrap();
        let held = Arc::clone(&dest.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let writer = std::thread::spawn(move || {
            let _conn = held.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(100));
        });
        locked_rx.recv().unwrap();

        let ((result, checked_at), ticked_at) = tokio::join!(
            async { (dest.check().await.unwrap(), Instant::now()) },
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Instant::now()
            },
        );
        assert!(ticked_at < checked_at);
        assert!(result.message.contains("0 entries"));
        writer.join().unwrap();
    }
}

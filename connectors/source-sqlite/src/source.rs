//! `RecordSource` over a `SQLite` document collection.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use retrofill_sdk::prelude::*;
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use serde_json::Value;

use crate::config::{Config, MAX_PAGE_SIZE};
use crate::query::{build_page_query, from_sql_value, PageQuery};

/// Keyset-paginated reader over one table.
pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
    query: Arc<PageQuery>,
    config: Config,
}

impl SqliteSource {
    /// Open the database read-only and prepare the page query.
    ///
    /// # Errors
    ///
    /// Returns a config error if the file is missing, an identifier or filter
    /// is invalid, or the table does not exist.
    pub fn open(
        config: Config,
        order_by: &str,
        filters: &[FieldFilter],
    ) -> Result<Self, ConnectorError> {
        config.validate()?;
        if !config.path.is_file() {
            return Err(ConnectorError::config(
                "SOURCE_NOT_FOUND",
                format!("source database {} does not exist", config.path.display()),
            ));
        }
        let query = build_page_query(&config, order_by, filters)?;
        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            ConnectorError::config(
                "OPEN_FAILED",
                format!("cannot open {}: {e}", config.path.display()),
            )
        })?;
        // Fail at open time on a missing table or bad JSON path.
        conn.prepare(&query.first_sql).map_err(|e| {
            ConnectorError::config(
                "INVALID_QUERY",
                format!("cannot query table '{}': {e}", config.table),
            )
        })?;

        tracing::debug!(
            path = %config.path.display(),
            table = %config.table,
            order_by,
            filters = filters.len(),
            "Opened SQLite source"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            query: Arc::new(query),
            config,
        })
    }

    fn lock_error() -> ConnectorError {
        ConnectorError::internal("LOCK_POISONED", "source connection mutex poisoned")
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(String, Value, Option<String>)> {
    let id = match from_sql_value(row.get_ref(0)?) {
        Value::String(s) => s,
        other => other.to_string(),
    };
    let order_key = from_sql_value(row.get_ref(1)?);
    let body: Option<String> = row.get(2)?;
    Ok((id, order_key, body))
}

fn to_record(
    id: String,
    order_key: Value,
    body: Option<String>,
) -> Result<SourceRecord, ConnectorError> {
    let fields = match body.as_deref() {
        None => serde_json::Map::new(),
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(ConnectorError::data(
                    "BODY_NOT_OBJECT",
                    format!("record '{id}' body is not a JSON object"),
                ))
            }
            Err(e) => {
                return Err(ConnectorError::data(
                    "MALFORMED_BODY",
                    format!("record '{id}' body is not valid JSON: {e}"),
                ))
            }
        },
    };
    Ok(SourceRecord::new(id, order_key, fields))
}

fn db_error(e: &rusqlite::Error) -> ConnectorError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            ConnectorError::transient_db("DATABASE_BUSY", e.to_string())
        }
        _ => ConnectorError::internal("QUERY_FAILED", e.to_string()),
    }
}

impl RecordSource for SqliteSource {
    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> Result<Page, ConnectorError> {
        if page_size == 0 {
            return Err(ConnectorError::config(
                "INVALID_PAGE_SIZE",
                "page size must be at least 1",
            ));
        }
        if page_size > MAX_PAGE_SIZE {
            return Err(ConnectorError::quota(
                "PAGE_SIZE_EXCEEDED",
                format!("page size {page_size} exceeds maximum {MAX_PAGE_SIZE}"),
            ));
        }

        let conn = Arc::clone(&self.conn);
        let query = Arc::clone(&self.query);
        let cursor = cursor.cloned();

        let started = Instant::now();
        let records = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| Self::lock_error())?;
            let mut stmt = conn
                .prepare_cached(query.sql(cursor.as_ref()))
                .map_err(|e| db_error(&e))?;
            let rows = stmt
                .query_map(params_from_iter(query.params(cursor.as_ref(), page_size)), read_row)
                .map_err(|e| db_error(&e))?;
            let mut records = Vec::with_capacity(page_size);
            for row in rows {
                let (id, order_key, body) = row.map_err(|e| db_error(&e))?;
                records.push(to_record(id, order_key, body)?);
            }
            Ok::<_, ConnectorError>(records)
        })
        .await
        .map_err(|e| ConnectorError::internal("TASK_FAILED", e.to_string()))??;

        tracing::debug!(
            table = %self.config.table,
            records = records.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Fetched page"
        );
        Ok(Page::from_records(records))
    }

    fn max_page_size(&self) -> Option<usize> {
        Some(MAX_PAGE_SIZE)
    }

    async fn check(&self) -> Result<ValidationResult, ConnectorError> {
        let conn = Arc::clone(&self.conn);
        let table = self.config.table.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| Self::lock_error())?;
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))
                .map_err(|e| db_error(&e))?;
            Ok::<_, ConnectorError>(ValidationResult::success(format!(
                "table '{table}' readable, {count} rows"
            )))
        })
        .await
        .map_err(|e| ConnectorError::internal("TASK_FAILED", e.to_string()))?
    }
}

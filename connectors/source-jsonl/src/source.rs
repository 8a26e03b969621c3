//! `RecordSource` over a JSON-lines export loaded into memory.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};

use retrofill_sdk::prelude::*;
use retrofill_types::record::lookup_path;
use serde_json::Value;

use crate::config::Config;

/// Counters from loading the export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub lines_read: u64,
    pub loaded: u64,
    pub skipped_missing_id: u64,
    pub skipped_missing_order_key: u64,
    /// Lines whose id was already loaded from an earlier line.
    pub skipped_duplicate_id: u64,
    pub filtered_out: u64,
}

/// In-memory, sorted view of a JSON-lines export.
#[derive(Debug)]
pub struct JsonlSource {
    records: Vec<SourceRecord>,
    stats: LoadStats,
}

impl JsonlSource {
    /// Load and index the export.
    ///
    /// # Errors
    ///
    /// Returns a config error if the file cannot be read, a line is not a
    /// JSON object, or a filter is malformed.
    pub fn open(
        config: &Config,
        order_by: &str,
        filters: &[FieldFilter],
    ) -> Result<Self, ConnectorError> {
        for filter in filters {
            filter
                .validate()
                .map_err(|msg| ConnectorError::config("INVALID_FILTER", msg))?;
        }
        let file = File::open(&config.path).map_err(|e| {
            ConnectorError::config(
                "SOURCE_NOT_FOUND",
                format!("cannot open {}: {e}", config.path.display()),
            )
        })?;
        Self::load(BufReader::new(file), config, order_by, filters)
    }

    fn load(
        reader: impl BufRead,
        config: &Config,
        order_by: &str,
        filters: &[FieldFilter],
    ) -> Result<Self, ConnectorError> {
        let mut stats = LoadStats::default();
        let mut records = Vec::new();
        let mut ids = HashSet::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            if config
                .max_records
                .is_some_and(|cap| stats.lines_read >= cap as u64)
            {
                break;
            }
            let line = line.map_err(|e| {
                ConnectorError::config("READ_FAILED", format!("line {line_no}: {e}"))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            stats.lines_read += 1;

            let fields = match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(ConnectorError::config(
                        "MALFORMED_LINE",
                        format!("line {line_no}: expected a JSON object"),
                    ))
                }
                Err(e) => {
                    return Err(ConnectorError::config(
                        "MALFORMED_LINE",
                        format!("line {line_no}: {e}"),
                    ))
                }
            };

            let id = match lookup_path(&fields, &config.id_field) {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    stats.skipped_missing_id += 1;
                    continue;
                }
            };
            let mut record = SourceRecord::new(id, Value::Null, fields);
            match record.lookup(order_by) {
                Some(key) if !key.is_null() => record.order_key = key,
                _ => {
                    stats.skipped_missing_order_key += 1;
                    continue;
                }
            }
            // First line wins.
            if !ids.insert(record.id.clone()) {
                stats.skipped_duplicate_id += 1;
                continue;
            }
            if !filters.iter().all(|f| f.matches(&record)) {
                stats.filtered_out += 1;
                continue;
            }
            records.push(record);
        }

        records.sort_by(|a, b| position_cmp(&a.order_key, &a.id, &b.order_key, &b.id));
        stats.loaded = records.len() as u64;

        if stats.skipped_missing_id > 0 {
            tracing::warn!(
                path = %config.path.display(),
                skipped = stats.skipped_missing_id,
                id_field = %config.id_field,
                "Skipped records without an id"
            );
        }
        if stats.skipped_duplicate_id > 0 {
            tracing::warn!(
                path = %config.path.display(),
                skipped = stats.skipped_duplicate_id,
                id_field = %config.id_field,
                "Skipped records with a repeated id"
            );
        }
        tracing::info!(
            path = %config.path.display(),
            lines = stats.lines_read,
            loaded = stats.loaded,
            filtered_out = stats.filtered_out,
            "Loaded JSON-lines export"
        );

        Ok(Self { records, stats })
    }

    #[must_use]
    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSource for JsonlSource {
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
        let start = cursor.map_or(0, |c| {
            self.records
                .partition_point(|r| !c.precedes(&r.order_key, &r.id))
        });
        let end = start.saturating_add(page_size).min(self.records.len());
        Ok(Page::from_records(self.records[start..end].to_vec()))
    }

    async fn check(&self) -> Result<ValidationResult, ConnectorError> {
        Ok(ValidationResult::success(format!(
            "{} records indexed",
            self.records.len()
        )))
    }
}

//! Connector resolution and state backend creation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use retrofill_dest_sqlite::SqliteDestination;
use retrofill_sdk::prelude::*;
use retrofill_source_jsonl::JsonlSource;
use retrofill_source_sqlite::SqliteSource;
use retrofill_state::{SqliteStateBackend, StateBackend};
use serde::de::DeserializeOwned;

use crate::config::types::{PipelineConfig, StateBackendKind};
use crate::errors::PipelineError;

/// Parse a connector reference into (connector_id, connector_version).
///
/// Examples:
/// - "retrofill/source-sqlite@v0.1.0" -> ("source-sqlite", "0.1.0")
/// - "source-sqlite"                  -> ("source-sqlite", "unknown")
#[must_use]
pub fn parse_connector_ref(connector_ref: &str) -> (String, String) {
    let after_slash = connector_ref
        .split('/')
        .next_back()
        .unwrap_or(connector_ref);

    match after_slash.split_once('@') {
        Some((n, v)) => (n.to_string(), v.strip_prefix('v').unwrap_or(v).to_string()),
        None => (after_slash.to_string(), "unknown".to_string()),
    }
}

fn connector_config<T: DeserializeOwned>(
    connector_ref: &str,
    value: &serde_json::Value,
) -> Result<T, PipelineError> {
    serde_json::from_value(value.clone()).map_err(|e| {
        PipelineError::Configuration(format!("{connector_ref}: invalid connector config: {e}"))
    })
}

/// Source connector selected by `source.use`.
pub enum ResolvedSource {
    Sqlite(SqliteSource),
    Jsonl(JsonlSource),
}

impl RecordSource for ResolvedSource {
    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> Result<Page, ConnectorError> {
        match self {
            Self::Sqlite(s) => s.fetch_page(cursor, page_size).await,
            Self::Jsonl(s) => s.fetch_page(cursor, page_size).await,
        }
    }

    fn max_page_size(&self) -> Option<usize> {
        match self {
            Self::Sqlite(s) => s.max_page_size(),
            Self::Jsonl(s) => s.max_page_size(),
        }
    }

    async fn check(&self) -> Result<ValidationResult, ConnectorError> {
        match self {
            Self::Sqlite(s) => s.check().await,
            Self::Jsonl(s) => s.check().await,
        }
    }
}

/// Destination for dry runs: every write succeeds and nothing is kept.
#[derive(Debug)]
pub struct DiscardDestination {
    max_group_size: usize,
    discarded: AtomicU64,
}

impl DiscardDestination {
    #[must_use]
    pub fn new(max_group_size: usize) -> Self {
        Self {
            max_group_size,
            discarded: AtomicU64::new(0),
        }
    }

    /// Records accepted and dropped so far.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> DocumentId {
        format!("dry-run-{}", self.discarded.fetch_add(1, Ordering::Relaxed))
    }
}

impl Destination for DiscardDestination {
    async fn create(&self, _record: &DerivedRecord) -> Result<DocumentId, ConnectorError> {
        Ok(self.next_id())
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
        Ok(records.iter().map(|_| self.next_id()).collect())
    }

    fn max_group_size(&self) -> usize {
        self.max_group_size
    }

    async fn check(&self) -> Result<ValidationResult, ConnectorError> {
        Ok(ValidationResult::success("dry run: writes are discarded"))
    }
}

/// Destination connector selected by `destination.use`.
pub enum ResolvedDestination {
    Sqlite(SqliteDestination),
    Discard(DiscardDestination),
}

impl Destination for ResolvedDestination {
    async fn create(&self, record: &DerivedRecord) -> Result<DocumentId, ConnectorError> {
        match self {
            Self::Sqlite(d) => d.create(record).await,
            Self::Discard(d) => d.create(record).await,
        }
    }

    async fn create_group(
        &self,
        records: &[DerivedRecord],
    ) -> Result<Vec<DocumentId>, ConnectorError> {
        match self {
            Self::Sqlite(d) => d.create_group(records).await,
            Self::Discard(d) => d.create_group(records).await,
        }
    }

    fn max_group_size(&self) -> usize {
        match self {
            Self::Sqlite(d) => d.max_group_size(),
            Self::Discard(d) => d.max_group_size(),
        }
    }

    async fn check(&self) -> Result<ValidationResult, ConnectorError> {
        match self {
            Self::Sqlite(d) => d.check().await,
            Self::Discard(d) => d.check().await,
        }
    }
}

/// Open the configured source connector.
///
/// # Errors
///
/// Returns [`PipelineError::Configuration`] for an unknown connector, an
/// invalid connector config, or a source that cannot be opened.
pub fn resolve_source(config: &PipelineConfig) -> Result<ResolvedSource, PipelineError> {
    let source = &config.source;
    let (name, _version) = parse_connector_ref(&source.use_ref);
    let resolved = match name.as_str() {
        "source-sqlite" => {
            let cfg: retrofill_source_sqlite::Config =
                connector_config(&source.use_ref, &source.config)?;
            SqliteSource::open(cfg, &source.order_by, &source.filters).map(ResolvedSource::Sqlite)
        }
        "source-jsonl" => {
            let cfg: retrofill_source_jsonl::Config =
                connector_config(&source.use_ref, &source.config)?;
            JsonlSource::open(&cfg, &source.order_by, &source.filters).map(ResolvedSource::Jsonl)
        }
        other => {
            return Err(PipelineError::Configuration(format!(
                "unknown source connector '{other}'"
            )))
        }
    };
    let resolved = resolved.map_err(|e| PipelineError::config(&source.use_ref, &e))?;
    tracing::info!(connector = %name, "Resolved source connector");
    Ok(resolved)
}

/// Open the configured destination, or a discarding stand-in for dry runs.
///
/// The connector config is parsed and validated in both cases so a dry run
/// enforces the same group cap as a real one.
///
/// # Errors
///
/// Returns [`PipelineError::Configuration`] for an unknown connector, an
/// invalid connector config, or a destination that cannot be opened.
pub fn resolve_destination(
    config: &PipelineConfig,
    dry_run: bool,
) -> Result<ResolvedDestination, PipelineError> {
    let destination = &config.destination;
    let (name, _version) = parse_connector_ref(&destination.use_ref);
    match name.as_str() {
        "dest-sqlite" => {
            let cfg: retrofill_dest_sqlite::Config =
                connector_config(&destination.use_ref, &destination.config)?;
            cfg.validate()
                .map_err(|e| PipelineError::config(&destination.use_ref, &e))?;
            if dry_run {
                tracing::info!(connector = %name, "Dry run: destination writes are discarded");
                return Ok(ResolvedDestination::Discard(DiscardDestination::new(
                    cfg.max_group_size,
                )));
            }
            let dest = SqliteDestination::open(&cfg, &destination.collection)
                .map_err(|e| PipelineError::config(&destination.use_ref, &e))?;
            tracing::info!(
                connector = %name,
                collection = %destination.collection,
                "Resolved destination connector"
            );
            Ok(ResolvedDestination::Sqlite(dest))
        }
        other => Err(PipelineError::Configuration(format!(
            "unknown destination connector '{other}'"
        ))),
    }
}

fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".retrofill").join("state.db")
}

/// Open the run-history backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be opened.
pub fn create_state_backend(config: &PipelineConfig) -> Result<Arc<dyn StateBackend>> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let backend = if let Some(path) = &config.state.connection {
                SqliteStateBackend::open(Path::new(path)).context("Failed to open state DB")?
            } else {
                SqliteStateBackend::open(&default_state_path())
                    .context("Failed to open default state DB")?
            };
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

pub(crate) fn check_state_backend(config: &PipelineConfig) -> bool {
    match create_state_backend(config) {
        Ok(_) => {
            tracing::info!("State backend: OK");
            true
        }
        Err(e) => {
            tracing::error!("State backend: FAILED: {:#}", e);
            false
        }
    }
}

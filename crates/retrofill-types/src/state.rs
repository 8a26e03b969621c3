//! Run tracking model types.
//!
//! Pure data types used by `StateBackend` implementations and the pipeline
//! runner. Kept here so the engine and the state crate share them without a
//! dependency between each other.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::metric::ChunkResult;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque pipeline identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(String);

impl PipelineId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for PipelineId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Status of a run as persisted in run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Source reported end of data.
    Completed,
    /// Stopped by an external cancellation signal after draining in-flight writes.
    Cancelled,
    /// Aborted by a fatal error.
    Failed,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage form back into a status.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level accumulator. Updated only by merging [`ChunkResult`]s in chunk order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub pages_processed: u64,
    pub records_fetched: u64,
    pub records_accepted: u64,
    pub duplicates_rejected: u64,
    pub constraint_rejected: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rejected_by_constraint: BTreeMap<String, u64>,
    pub writes_succeeded: u64,
    /// Records covered by failed write operations.
    pub writes_failed: u64,
    pub write_operations: u64,
    pub failed_operations: u64,
    /// Cursor after the last processed page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cursor: Option<Cursor>,
}

impl RunStats {
    /// Fold one chunk's result into the run totals.
    pub fn merge_chunk(&mut self, chunk: &ChunkResult) {
        self.pages_processed += 1;
        self.records_fetched += chunk.fetched;
        self.records_accepted += chunk.filter.accepted;
        self.duplicates_rejected += chunk.filter.duplicates;
        self.constraint_rejected += chunk.filter.constraint_rejected;
        for (label, count) in &chunk.filter.by_constraint {
            *self.rejected_by_constraint.entry(label.clone()).or_default() += count;
        }
        self.writes_succeeded += chunk.write.succeeded;
        self.writes_failed += chunk.write.records_failed();
        self.write_operations += chunk.write.operations;
        self.failed_operations += chunk.write.failed.len() as u64;
    }

    #[must_use]
    pub fn records_rejected(&self) -> u64 {
        self.duplicates_rejected + self.constraint_rejected
    }
}

/// One row of run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub pipeline: PipelineId,
    pub status: RunStatus,
    /// ISO-8601 UTC.
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

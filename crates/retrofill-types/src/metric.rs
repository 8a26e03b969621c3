//! Per-chunk accounting: filter counts, write summaries, chunk results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::record::DerivedRecord;

// ── Filter ──────────────────────────────────────────────────────────

/// Why a record was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Dedup key already accepted earlier in this run.
    Duplicate,
    /// Failed the constraint predicate.
    Constraint,
}

/// Classification counts for one filtered page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCounts {
    pub accepted: u64,
    pub duplicates: u64,
    pub constraint_rejected: u64,
    /// Constraint rejections keyed by the first constraint that failed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_constraint: BTreeMap<String, u64>,
}

impl FilterCounts {
    /// Every record is counted exactly once across the three buckets.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.accepted + self.duplicates + self.constraint_rejected
    }

    pub fn record_rejection(&mut self, reason: RejectReason, constraint: Option<&str>) {
        match reason {
            RejectReason::Duplicate => self.duplicates += 1,
            RejectReason::Constraint => {
                self.constraint_rejected += 1;
                if let Some(label) = constraint {
                    *self.by_constraint.entry(label.to_string()).or_default() += 1;
                }
            }
        }
    }
}

// ── Writes ──────────────────────────────────────────────────────────

/// One failed write operation: a single record, or an entire atomic group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteFailure {
    /// Position of the first affected record within the chunk's accepted list.
    pub index: usize,
    /// Group number when the failure came from a grouped write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<usize>,
    /// Every record the failed operation covered.
    pub records: Vec<DerivedRecord>,
    pub cause: ConnectorError,
}

/// Aggregate outcome of a write stage over one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Records durably created.
    pub succeeded: u64,
    /// Write operations issued (records in individual mode, groups in grouped mode).
    pub operations: u64,
    /// Failed operations, ordered by `index`.
    pub failed: Vec<WriteFailure>,
}

impl WriteSummary {
    /// Number of records covered by failed operations.
    #[must_use]
    pub fn records_failed(&self) -> u64 {
        self.failed.iter().map(|f| f.records.len() as u64).sum()
    }
}

// ── Chunks ──────────────────────────────────────────────────────────

/// Combined result of filtering and writing one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    /// 1-based chunk number within the run.
    pub chunk: u64,
    pub fetched: u64,
    pub filter: FilterCounts,
    pub write: WriteSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived(key: &str) -> DerivedRecord {
        DerivedRecord {
            source_id: format!("src-{key}"),
            dedup_key: key.into(),
            fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn filter_counts_track_constraint_labels() {
        let mut counts = FilterCounts::default();
        counts.record_rejection(RejectReason::Constraint, Some("cycle eq 1"));
        counts.record_rejection(RejectReason::Constraint, Some("cycle eq 1"));
        counts.record_rejection(RejectReason::Duplicate, None);
        counts.accepted = 3;

        assert_eq!(counts.total(), 6);
        assert_eq!(counts.by_constraint["cycle eq 1"], 2);
        assert_eq!(counts.duplicates, 1);
    }

    #[test]
    fn records_failed_counts_group_members() {
        let summary = WriteSummary {
            succeeded: 2,
            operations: 3,
            failed: vec![WriteFailure {
                index: 2,
                group: Some(1),
                records: vec![derived("a"), derived("b")],
                cause: ConnectorError::transient_db("COMMIT_FAILED", "locked"),
            }],
        };
        assert_eq!(summary.records_failed(), 2);
    }
}

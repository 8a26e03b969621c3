//! Timestamp and dead-letter queue types.
//!
//! [`DlqRecord`] captures a derived record whose write failed so that an
//! operator can inspect or replay it after the run.

use crate::error::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO-8601 formatted timestamp string.
///
/// Thin wrapper providing type clarity without requiring a datetime
/// library dependency in this crate. Callers supply valid ISO-8601.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    #[must_use]
    pub fn new(iso8601: impl Into<String>) -> Self {
        Self(iso8601.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derived record whose write failed, routed to the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqRecord {
    /// Destination collection the write targeted.
    pub collection: String,
    /// JSON-serialized derived record.
    pub record_json: String,
    /// Human-readable error description.
    pub error_message: String,
    /// Error classification.
    pub error_category: ErrorCategory,
    /// Atomic group the record belonged to, when written in grouped mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_index: Option<u32>,
    /// When the failure was recorded.
    pub failed_at: Timestamp,
}

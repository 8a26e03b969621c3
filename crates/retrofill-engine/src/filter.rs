//! Filter and dedup stage: page of records to accepted derived records plus
//! rejection counts. No I/O.

use std::collections::{BTreeMap, HashSet};

use retrofill_sdk::prelude::*;
use retrofill_types::metric::{FilterCounts, RejectReason};
use serde_json::{Map, Value};

use crate::config::types::{DestinationConfig, FilterConfig};

/// A single constraint check. Constraints are a conjunction.
pub type Constraint = FieldFilter;

/// A dedup key value, tagged with its JSON type.
///
/// The number `42` and the string `"42"` are distinct keys, as are `true`
/// and `"true"`. Numbers compare by value, so `1` and `1.0` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    kind: KeyKind,
    text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeyKind {
    String,
    Number,
    Bool,
    Json,
}

impl DedupKey {
    /// Key for a field value. `null` has no key.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let (kind, text) = match value {
            Value::Null => return None,
            Value::String(s) => (KeyKind::String, s.clone()),
            Value::Number(n) => (
                KeyKind::Number,
                n.as_f64().map_or_else(|| n.to_string(), |f| f.to_string()),
            ),
            Value::Bool(b) => (KeyKind::Bool, b.to_string()),
            other => (KeyKind::Json, other.to_string()),
        };
        Some(Self { kind, text })
    }

    /// Text form, used as the diagnostic key of derived records.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl From<String> for DedupKey {
    fn from(text: String) -> Self {
        Self {
            kind: KeyKind::String,
            text,
        }
    }
}

impl From<&str> for DedupKey {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

/// Dedup keys accepted so far in this run.
///
/// Owned by the pipeline runner and lent to [`RecordFilter::apply`] one
/// chunk at a time.
#[derive(Debug, Default, Clone)]
pub struct DedupState {
    seen: HashSet<DedupKey>,
}

impl DedupState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Returns `false` if the key was already present.
    pub fn insert(&mut self, key: impl Into<DedupKey>) -> bool {
        self.seen.insert(key.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Accepted records and classification counts for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub accepted: Vec<DerivedRecord>,
    pub counts: FilterCounts,
}

/// Per-record classification.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Accepted(DerivedRecord),
    Duplicate,
    /// Carries the label of the first failing constraint.
    Rejected(String),
}

/// Dedup key extraction, constraint predicate and output projection.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    dedup_key: String,
    constraints: Vec<(Constraint, String)>,
    fields: BTreeMap<String, String>,
    missing_key_label: String,
}

impl RecordFilter {
    #[must_use]
    pub fn new(
        dedup_key: impl Into<String>,
        constraints: Vec<Constraint>,
        fields: BTreeMap<String, String>,
    ) -> Self {
        let dedup_key = dedup_key.into();
        let missing_key_label = format!("{dedup_key} missing");
        let constraints = constraints
            .into_iter()
            .map(|c| {
                let label = c.label();
                (c, label)
            })
            .collect();
        Self {
            dedup_key,
            constraints,
            fields,
            missing_key_label,
        }
    }

    #[must_use]
    pub fn from_config(filter: &FilterConfig, destination: &DestinationConfig) -> Self {
        Self::new(
            filter.dedup_key.clone(),
            filter.constraints.clone(),
            destination.fields.clone(),
        )
    }

    /// Dedup key of a record, if it has a usable one. `null` counts as missing.
    #[must_use]
    pub fn dedup_key_of(&self, record: &SourceRecord) -> Option<DedupKey> {
        DedupKey::from_value(&record.lookup(&self.dedup_key)?)
    }

    fn derive(&self, record: &SourceRecord, dedup_key: &DedupKey) -> DerivedRecord {
        let fields: Map<String, Value> = self
            .fields
            .iter()
            .map(|(out, path)| (out.clone(), record.lookup(path).unwrap_or(Value::Null)))
            .collect();
        DerivedRecord {
            source_id: record.id.clone(),
            dedup_key: dedup_key.as_str().to_string(),
            fields,
        }
    }

    /// Classify one record. Accepted keys are added to `dedup`.
    pub fn decide(&self, record: &SourceRecord, dedup: &mut DedupState) -> FilterDecision {
        let Some(key) = self.dedup_key_of(record) else {
            return FilterDecision::Rejected(self.missing_key_label.clone());
        };
        if dedup.contains(&key) {
            return FilterDecision::Duplicate;
        }
        if let Some((_, label)) = self.constraints.iter().find(|(c, _)| !c.matches(record)) {
            return FilterDecision::Rejected(label.clone());
        }
        let derived = self.derive(record, &key);
        dedup.insert(key);
        FilterDecision::Accepted(derived)
    }

    /// Filter a page in input order.
    pub fn apply(&self, records: &[SourceRecord], dedup: &mut DedupState) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        for record in records {
            match self.decide(record, dedup) {
                FilterDecision::Accepted(derived) => {
                    outcome.counts.accepted += 1;
                    outcome.accepted.push(derived);
                }
                FilterDecision::Duplicate => {
                    outcome.counts.record_rejection(RejectReason::Duplicate, None);
                }
                FilterDecision::Rejected(label) => {
                    outcome
                        .counts
                        .record_rejection(RejectReason::Constraint, Some(&label));
                }
            }
        }
        outcome
    }
}

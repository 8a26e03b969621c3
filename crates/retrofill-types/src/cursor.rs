//! Cursor and ordering-key comparison.
//!
//! A [`Cursor`] identifies the last record of a page. Sources order records
//! by `(order_key, id)`, so a cursor is a pair of those values and a page
//! fetched after it starts strictly beyond that pair.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque resumption token: "last record seen".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Ordering key of the last record returned.
    pub order_key: Value,
    /// Identifier of the last record returned (tie-breaker).
    pub record_id: String,
}

impl Cursor {
    #[must_use]
    pub fn new(order_key: Value, record_id: impl Into<String>) -> Self {
        Self {
            order_key,
            record_id: record_id.into(),
        }
    }

    /// Whether a record with the given position sorts strictly after this cursor.
    #[must_use]
    pub fn precedes(&self, order_key: &Value, record_id: &str) -> bool {
        position_cmp(&self.order_key, &self.record_id, order_key, record_id) == Ordering::Less
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.order_key, self.record_id)
    }
}

/// Total-enough ordering over JSON scalars.
///
/// Numbers compare numerically, strings lexicographically (ISO-8601
/// timestamps therefore order chronologically), booleans `false < true`,
/// and `null` equals `null`. Any other pairing is incomparable.
#[must_use]
pub fn compare_keys(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                Some(x.cmp(&y))
            } else {
                x.as_f64()?.partial_cmp(&y.as_f64()?)
            }
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Rank of a JSON type when keys of different types must be ordered.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order on `(order_key, id)` positions.
///
/// Comparable keys use [`compare_keys`]. Otherwise keys order by JSON type,
/// then by their JSON text.
#[must_use]
pub fn position_cmp(a_key: &Value, a_id: &str, b_key: &Value, b_id: &str) -> Ordering {
    let keys = compare_keys(a_key, b_key).unwrap_or_else(|| {
        type_rank(a_key)
            .cmp(&type_rank(b_key))
            .then_with(|| a_key.to_string().cmp(&b_key.to_string()))
    });
    keys.then_with(|| a_id.cmp(b_id))
}

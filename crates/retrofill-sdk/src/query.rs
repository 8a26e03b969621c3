//! Field/operator/value predicates.
//!
//! Used for source query filters (translated by each source into whatever its
//! store supports) and for the engine's constraint predicate. Semantics:
//!
//! - a missing field fails every operator, including `ne`
//! - numbers compare numerically, strings lexicographically
//! - values of different types never match a range operator

use std::cmp::Ordering;
use std::fmt;

use retrofill_types::cursor::compare_keys;
use retrofill_types::record::SourceRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    /// Field equals any element of an array value.
    In,
}

impl FilterOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::In => "in",
        }
    }

    /// Whether the operator is an inequality/range check.
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(self, Self::Ne | Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `field op value` check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Dotted path into the record body, or `$id` / `$order_key`.
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldFilter {
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate against a record.
    #[must_use]
    pub fn matches(&self, record: &SourceRecord) -> bool {
        record
            .lookup(&self.field)
            .is_some_and(|actual| evaluate(self.op, &actual, &self.value))
    }

    /// Stable human-readable label, e.g. `autopayInfo.cycle eq 1`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {} {}", self.field, self.op, self.value)
    }

    /// Check the value shape against the operator.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when `in` is given a non-array or
    /// a range operator is given a non-scalar.
    pub fn validate(&self) -> Result<(), String> {
        if self.field.trim().is_empty() {
            return Err("filter field must not be empty".to_string());
        }
        match self.op {
            FilterOp::In if !self.value.is_array() => Err(format!(
                "'{}': operator 'in' requires an array value",
                self.field
            )),
            op if op.is_range() && !is_scalar(&self.value) => Err(format!(
                "'{}': operator '{op}' requires a scalar value",
                self.field
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for FieldFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match compare_keys(actual, expected) {
        Some(ordering) => ordering == Ordering::Equal,
        None => actual == expected,
    }
}

/// Apply `op` to a present field value.
#[must_use]
pub fn evaluate(op: FilterOp, actual: &Value, expected: &Value) -> bool {
    match op {
        FilterOp::Eq => values_equal(actual, expected),
        FilterOp::Ne => !values_equal(actual, expected),
        FilterOp::In => expected
            .as_array()
            .is_some_and(|options| options.iter().any(|o| values_equal(actual, o))),
        FilterOp::Lt => compare_keys(actual, expected) == Some(Ordering::Less),
        FilterOp::Lte => matches!(
            compare_keys(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::Gt => compare_keys(actual, expected) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(
            compare_keys(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn record(body: Value) -> SourceRecord {
        let Value::Object(fields) = body else {
            panic!("body must be an object")
        };
        SourceRecord::new("r1", json!(1), fields)
    }

    #[rstest]
    #[case(FilterOp::Eq, json!(1), json!(1), true)]
    #[case(FilterOp::Eq, json!(1), json!(1.0), true)]
    #[case(FilterOp::Eq, json!(2), json!(1), false)]
    #[case(FilterOp::Eq, json!("1"), json!(1), false)]
    #[case(FilterOp::Ne, json!(""), json!(""), false)]
    #[case(FilterOp::Ne, json!("ap-1"), json!(""), true)]
    #[case(FilterOp::Lt, json!(1), json!(2), true)]
    #[case(FilterOp::Lte, json!(2), json!(2), true)]
    #[case(FilterOp::Gt, json!("2025-10-03"), json!("2025-10-02"), true)]
    #[case(FilterOp::Gte, json!("2025-10-01"), json!("2025-10-02"), false)]
    #[case(FilterOp::Gt, json!("3"), json!(2), false)]
    #[case(FilterOp::In, json!(2), json!([1, 2, 3]), true)]
    #[case(FilterOp::In, json!(4), json!([1, 2, 3]), false)]
    #[case(FilterOp::Eq, json!({"a": 1}), json!({"a": 1}), true)]
    fn operator_semantics(
        #[case] op: FilterOp,
        #[case] actual: Value,
        #[case] expected: Value,
        #[case] result: bool,
    ) {
        assert_eq!(evaluate(op, &actual, &expected), result);
    }

    #[test]
    fn missing_field_fails_even_ne() {
        let r = record(json!({"other": 1}));
        assert!(!FieldFilter::new("parentAutopayId", FilterOp::Ne, json!("")).matches(&r));
        assert!(!FieldFilter::new("parentAutopayId", FilterOp::Eq, json!(null)).matches(&r));
    }

    #[test]
    fn nested_field_matches() {
        let r = record(json!({"autopayInfo": {"cycle": 1}}));
        assert!(FieldFilter::new("autopayInfo.cycle", FilterOp::Eq, json!(1)).matches(&r));
        assert!(!FieldFilter::new("autopayInfo.cycle", FilterOp::Eq, json!(2)).matches(&r));
    }

    #[test]
    fn label_is_stable() {
        let f = FieldFilter::new("autopayInfo.deductionMonth", FilterOp::Eq, json!("October_2025"));
        assert_eq!(f.label(), "autopayInfo.deductionMonth eq \"October_2025\"");
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        assert!(FieldFilter::new("a", FilterOp::In, json!(1)).validate().is_err());
        assert!(FieldFilter::new("a", FilterOp::Gt, json!([1])).validate().is_err());
        assert!(FieldFilter::new(" ", FilterOp::Eq, json!(1)).validate().is_err());
        assert!(FieldFilter::new("a", FilterOp::In, json!([1])).validate().is_ok());
    }

    #[test]
    fn operator_aliases_deserialize() {
        let f: FieldFilter =
            serde_json::from_value(json!({"field": "a", "op": ">=", "value": 1})).unwrap();
        assert_eq!(f.op, FilterOp::Gte);
        let f: FieldFilter =
            serde_json::from_value(json!({"field": "a", "op": "ne", "value": ""})).unwrap();
        assert_eq!(f.op, FilterOp::Ne);
    }
}

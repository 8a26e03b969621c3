//! SQL generation for filtered, keyset-paginated page reads.

use std::fmt::Write as _;

use retrofill_sdk::prelude::*;
use retrofill_types::record::{ID_PATH, ORDER_KEY_PATH};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

use crate::config::Config;

/// Prepared SQL for the first page and for every page after a cursor.
#[derive(Debug, Clone)]
pub struct PageQuery {
    /// `?1..?n` filters, then `?n+1` limit.
    pub first_sql: String,
    /// `?1..?n` filters, `?n+1` cursor key, `?n+2` cursor id, `?n+3` limit.
    pub resume_sql: String,
    pub filter_params: Vec<SqlValue>,
}

impl PageQuery {
    /// Parameters for a page fetch.
    #[must_use]
    pub fn params(&self, cursor: Option<&Cursor>, limit: usize) -> Vec<SqlValue> {
        let mut params = self.filter_params.clone();
        if let Some(cursor) = cursor {
            params.push(to_sql_value(&cursor.order_key));
            params.push(SqlValue::Text(cursor.record_id.clone()));
        }
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        params
    }

    #[must_use]
    pub fn sql(&self, cursor: Option<&Cursor>) -> &str {
        if cursor.is_some() {
            &self.resume_sql
        } else {
            &self.first_sql
        }
    }
}

/// Quote an identifier already validated by [`Config::validate`].
fn quote_ident(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// SQL expression reading `path` from a row.
fn field_expr(config: &Config, order_expr: &str, path: &str) -> String {
    match path {
        ID_PATH => quote_ident(&config.id_column),
        ORDER_KEY_PATH => order_expr.to_string(),
        _ if config.columns.iter().any(|c| c == path) => quote_ident(path),
        _ => format!(
            "json_extract({}, {})",
            quote_ident(&config.body_column),
            quote_literal(&format!("$.{path}"))
        ),
    }
}

/// Build the page queries for a collection.
///
/// # Errors
///
/// Returns a config error if a filter has an invalid value shape.
pub fn build_page_query(
    config: &Config,
    order_by: &str,
    filters: &[FieldFilter],
) -> Result<PageQuery, ConnectorError> {
    let id = quote_ident(&config.id_column);
    let order_expr = field_expr(config, "", order_by);
    if order_expr.is_empty() {
        return Err(ConnectorError::config(
            "INVALID_ORDER_BY",
            "order_by cannot refer to the ordering key itself",
        ));
    }

    let mut predicates = vec![format!("{order_expr} IS NOT NULL")];
    let mut filter_params = Vec::new();
    for filter in filters {
        filter
            .validate()
            .map_err(|msg| ConnectorError::config("INVALID_FILTER", msg))?;
        let expr = field_expr(config, &order_expr, &filter.field);
        let predicate = match comparison_op(filter.op) {
            Some(sql_op) => {
                filter_params.push(to_sql_value(&filter.value));
                format!("{expr} IS NOT NULL AND {expr} {sql_op} ?{}", filter_params.len())
            }
            None => {
                let options = filter.value.as_array().map_or(&[][..], Vec::as_slice);
                if options.is_empty() {
                    // `IN ()` matches nothing.
                    "0".to_string()
                } else {
                    let mut placeholders = Vec::with_capacity(options.len());
                    for option in options {
                        filter_params.push(to_sql_value(option));
                        placeholders.push(format!("?{}", filter_params.len()));
                    }
                    format!("{expr} IN ({})", placeholders.join(", "))
                }
            }
        };
        predicates.push(format!("({predicate})"));
    }

    let n = filter_params.len();
    let select = format!(
        "SELECT {id}, {order_expr}, {body} FROM {table}",
        body = quote_ident(&config.body_column),
        table = quote_ident(&config.table),
    );
    let where_clause = predicates.join(" AND ");

    let mut first_sql = format!("{select} WHERE {where_clause}");
    let mut resume_sql = format!(
        "{select} WHERE {where_clause} AND ({order_expr} > ?{k} OR ({order_expr} = ?{k} AND {id} > ?{i}))",
        k = n + 1,
        i = n + 2,
    );
    let _ = write!(first_sql, " ORDER BY {order_expr}, {id} LIMIT ?{}", n + 1);
    let _ = write!(resume_sql, " ORDER BY {order_expr}, {id} LIMIT ?{}", n + 3);

    Ok(PageQuery {
        first_sql,
        resume_sql,
        filter_params,
    })
}

/// Bind a JSON scalar the way `json_extract` would return it.
#[must_use]
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Convert a column value back to JSON.
#[must_use]
pub fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// SQL operator of a binary comparison. `None` for `in`, which expands to a
/// placeholder list.
fn comparison_op(op: FilterOp) -> Option<&'static str> {
    match op {
        FilterOp::Eq => Some("="),
        FilterOp::Ne => Some("!="),
        FilterOp::Lt => Some("<"),
        FilterOp::Lte => Some("<="),
        FilterOp::Gt => Some(">"),
        FilterOp::Gte => Some(">="),
        FilterOp::In => None,
    }
}

//! Source `SQLite` connector configuration.

use std::path::PathBuf;

use retrofill_sdk::prelude::*;
use serde::Deserialize;

/// Largest page served by one query.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Connection and table settings for a `SQLite` document collection.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Database file. Opened read-only; it must already exist.
    pub path: PathBuf,
    /// Table holding the collection.
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Column holding the JSON document body.
    #[serde(default = "default_body_column")]
    pub body_column: String,
    /// Top-level table columns addressable by name in `order_by` and
    /// filters (e.g. `created_at`). Every other path reads the JSON body.
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_table() -> String {
    "documents".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_body_column() -> String {
    "body".to_string()
}

impl Config {
    /// Validate identifiers before they are spliced into SQL.
    ///
    /// # Errors
    ///
    /// Returns a config error naming the first invalid identifier.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        let fixed = [
            ("table", &self.table),
            ("id_column", &self.id_column),
            ("body_column", &self.body_column),
        ];
        let extra = self.columns.iter().map(|c| ("columns", c));
        for (what, ident) in fixed.into_iter().chain(extra) {
            if !is_identifier(ident) {
                return Err(ConnectorError::config(
                    "INVALID_IDENTIFIER",
                    format!("{what} '{ident}' is not a valid SQL identifier"),
                ));
            }
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cfg: Config = serde_json::from_value(serde_json::json!({"path": "a.db"})).unwrap();
        assert_eq!(cfg.table, "documents");
        assert_eq!(cfg.id_column, "id");
        assert_eq!(cfg.body_column, "body");
        assert!(cfg.columns.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_injected_table_name() {
        let cfg: Config = serde_json::from_value(
            serde_json::json!({"path": "a.db", "table": "docs; DROP TABLE x"}),
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code, "INVALID_IDENTIFIER");
    }

    #[test]
    fn rejects_invalid_extra_column() {
        let cfg: Config = serde_json::from_value(
            serde_json::json!({"path": "a.db", "columns": ["created_at", "x-y"]}),
        )
        .unwrap();
        assert!(cfg.validate().unwrap_err().message.contains("x-y"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<Config, _> =
            serde_json::from_value(serde_json::json!({"path": "a.db", "tabel": "x"}));
        assert!(result.is_err());
    }
}

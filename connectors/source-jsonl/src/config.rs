//! Source JSON-lines connector configuration.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub path: PathBuf,
    /// Body field holding the record identifier.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Stop loading after this many non-empty lines.
    #[serde(default)]
    pub max_records: Option<usize>,
}

fn default_id_field() -> String {
    "id".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cfg: Config = serde_json::from_value(serde_json::json!({"path": "a.jsonl"})).unwrap();
        assert_eq!(cfg.id_field, "id");
        assert!(cfg.max_records.is_none());
    }

    #[test]
    fn parses_cap() {
        let cfg: Config = serde_json::from_value(
            serde_json::json!({"path": "a.jsonl", "id_field": "_id", "max_records": 10}),
        )
        .unwrap();
        assert_eq!(cfg.id_field, "_id");
        assert_eq!(cfg.max_records, Some(10));
    }
}

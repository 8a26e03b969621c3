//! Pipeline YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::PipelineConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        let name = &cap[1];
        std::env::var(name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

/// Parse a pipeline YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML does not match the
/// pipeline schema.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: PipelineConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse pipeline YAML")?;
    Ok(config)
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::PipelineWriteMode;
    use retrofill_sdk::prelude::FilterOp;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("RF_TEST_SOURCE_DB", "/data/source.db");
        let input = "path: ${RF_TEST_SOURCE_DB}\ntable: transactions";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "path: /data/source.db\ntable: transactions");
        std::env::remove_var("RF_TEST_SOURCE_DB");
    }

    #[test]
    fn test_repeated_var_substituted_everywhere() {
        std::env::set_var("RF_TEST_REPEAT", "x");
        let result = substitute_env_vars("${RF_TEST_REPEAT}-${RF_TEST_REPEAT}").unwrap();
        assert_eq!(result, "x-x");
        std::env::remove_var("RF_TEST_REPEAT");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "page_size: 1000";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let input = "${RF_MISSING_X} and ${RF_MISSING_Y} and ${RF_MISSING_X}";
        let err_msg = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err_msg.contains("RF_MISSING_X, RF_MISSING_Y"), "{err_msg}");
    }

    #[test]
    fn test_parse_pipeline_from_string() {
        std::env::set_var("RF_TEST_DEST_DB", "/tmp/dest.db");
        let yaml = r#"
version: "1.0"
pipeline: subscription-retries
source:
  use: source-sqlite
  config:
    path: ./source.db
    table: transactions
  order_by: createdAt
  filters:
    - { field: parentAutopayId, op: ne, value: "" }
    - { field: createdAt, op: ">=", value: "2025-10-02T00:00:00Z" }
filter:
  dedup_key: parentAutopayId
  constraints:
    - { field: autopayInfo.cycle, op: eq, value: 1 }
destination:
  use: dest-sqlite
  config:
    path: ${RF_TEST_DEST_DB}
  collection: subscription-retries
  fields:
    parentAutopayId: parentAutopayId
    cycle: autopayInfo.cycle
  write_mode: grouped
  group_size: 250
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.pipeline, "subscription-retries");
        assert_eq!(config.destination.config["path"], "/tmp/dest.db");
        assert_eq!(config.source.filters[1].op, FilterOp::Gte);
        assert_eq!(config.filter.constraints.len(), 1);
        assert_eq!(config.destination.write_mode, PipelineWriteMode::Grouped);
        assert_eq!(config.destination.group_size, 250);
        assert_eq!(config.resources.page_size, 1000);
        assert!(config.state.connection.is_none());
        std::env::remove_var("RF_TEST_DEST_DB");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let yaml = r#"
version: "1.0"
pipeline: p
source: { use: source-jsonl, order_by: createdAt }
filter: { dedup_key: k }
destination: { use: dest-sqlite, collection: c, batch_size: 10 }
"#;
        let err = format!("{:#}", parse_pipeline_str(yaml).unwrap_err());
        assert!(err.contains("batch_size"), "{err}");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        assert!(parse_pipeline_str("this is not: [valid: yaml: {{{}}}").is_err());
    }

    #[test]
    fn test_parse_pipeline_file_not_found() {
        let err = parse_pipeline(Path::new("/nonexistent/pipeline.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read pipeline file"));
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../tests/fixtures/pipelines")
            .join(name)
    }

    #[test]
    fn test_fixture_pipelines_parse_and_validate() {
        std::env::set_var("RETROFILL_SOURCE_DB", "/data/source.db");
        std::env::set_var("RETROFILL_DEST_DB", "/data/dest.db");
        std::env::set_var("RETROFILL_STATE_DB", "/data/state.db");
        for name in ["subscription_retries.yaml", "jsonl_export.yaml"] {
            let config = parse_pipeline(&fixture(name)).unwrap();
            crate::config::validate_pipeline(&config).unwrap();
        }
        let config = parse_pipeline(&fixture("subscription_retries.yaml")).unwrap();
        assert_eq!(config.resources.max_inflight_writes, 8);
        assert_eq!(config.state.connection.as_deref(), Some("/data/state.db"));
    }
}

//! Semantic validation for parsed pipeline configuration values.

use anyhow::{bail, Result};
use retrofill_sdk::prelude::FieldFilter;

use crate::config::types::{PipelineConfig, MAX_PAGE_SIZE};

fn validate_filters(filters: &[FieldFilter], context: &str, errors: &mut Vec<String>) {
    for (i, filter) in filters.iter().enumerate() {
        if let Err(msg) = filter.validate() {
            errors.push(format!("{context}[{i}]: {msg}"));
        }
    }
}

fn require_non_empty(value: &str, what: &str, errors: &mut Vec<String>) {
    if value.trim().is_empty() {
        errors.push(format!("{what} must not be empty"));
    }
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing every validation failure found.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    require_non_empty(&config.pipeline, "Pipeline name", &mut errors);
    require_non_empty(
        &config.source.use_ref,
        "Source connector reference (use)",
        &mut errors,
    );
    require_non_empty(&config.source.order_by, "source.order_by", &mut errors);
    validate_filters(&config.source.filters, "source.filters", &mut errors);

    require_non_empty(&config.filter.dedup_key, "filter.dedup_key", &mut errors);
    validate_filters(&config.filter.constraints, "filter.constraints", &mut errors);

    let dest = &config.destination;
    require_non_empty(
        &dest.use_ref,
        "Destination connector reference (use)",
        &mut errors,
    );
    require_non_empty(&dest.collection, "destination.collection", &mut errors);
    if dest.fields.is_empty() {
        errors.push("destination.fields must map at least one output field".to_string());
    }
    for (name, path) in &dest.fields {
        if name.trim().is_empty() {
            errors.push("destination.fields has an empty output field name".to_string());
        }
        if path.trim().is_empty() {
            errors.push(format!("destination.fields.{name} has an empty source path"));
        }
    }
    if dest.group_size == 0 {
        errors.push("destination.group_size must be at least 1".to_string());
    }

    let page_size = config.resources.page_size;
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        errors.push(format!(
            "resources.page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        ));
    }
    if config.resources.max_inflight_writes == 0 {
        errors.push("resources.max_inflight_writes must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

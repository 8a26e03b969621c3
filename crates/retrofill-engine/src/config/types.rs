//! Pipeline YAML configuration types.

use std::collections::BTreeMap;

use retrofill_sdk::prelude::{FieldFilter, DEFAULT_MAX_GROUP_SIZE};
use serde::{Deserialize, Serialize};

/// Default records per fetched page.
pub const DEFAULT_PAGE_SIZE: usize = 1_000;
/// Largest page size any configuration may request.
pub const MAX_PAGE_SIZE: usize = 10_000;
/// Default cap on concurrently outstanding write operations per chunk.
pub const DEFAULT_MAX_INFLIGHT_WRITES: usize = 64;

/// Top-level pipeline configuration, parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    pub source: SourceConfig,
    pub filter: FilterConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(rename = "use")]
    pub use_ref: String,
    /// Connector-specific settings, passed through untouched.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Ascending sort key. Pages are ordered by `(order_by, id)`.
    pub order_by: String,
    /// Server-side query filters.
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Field whose value identifies a logical entity within a run.
    pub dedup_key: String,
    /// Conjunction of checks every accepted record must pass.
    #[serde(default)]
    pub constraints: Vec<FieldFilter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineWriteMode {
    #[default]
    Individual,
    Grouped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub config: serde_json::Value,
    pub collection: String,
    /// Output field name to source path.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub write_mode: PipelineWriteMode,
    /// Records per atomic group. Only used in grouped mode.
    #[serde(default = "default_group_size")]
    pub group_size: usize,
}

fn default_group_size() -> usize {
    DEFAULT_MAX_GROUP_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_inflight_writes")]
    pub max_inflight_writes: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_inflight_writes: DEFAULT_MAX_INFLIGHT_WRITES,
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_inflight_writes() -> usize {
    DEFAULT_MAX_INFLIGHT_WRITES
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Database path. Defaults to `~/.retrofill/state.db`.
    #[serde(default)]
    pub connection: Option<String>,
}

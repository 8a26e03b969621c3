//! Execution mode types for pipeline runs.

/// Runtime execution options (not part of pipeline YAML config).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Run filter and accounting, but discard every write and skip run tracking.
    pub dry_run: bool,
    /// Stop after this many chunks.
    pub max_pages: Option<u64>,
}

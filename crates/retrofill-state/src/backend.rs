//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for run history and
//! dead-letter records. Model types live in [`retrofill_types::state`].

use retrofill_types::envelope::DlqRecord;
use retrofill_types::state::{PipelineId, RunRecord, RunStats, RunStatus};

use crate::error;

/// Storage contract for pipeline run state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Begin a new run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId) -> error::Result<i64>;

    /// Finalize a run with status, aggregate stats and optional error message.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        stats: &RunStats,
        error_message: Option<&str>,
    ) -> error::Result<()>;

    /// Persist dead-letter records for failed writes. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_dlq_records(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        records: &[DlqRecord],
    ) -> error::Result<u64>;

    /// Most recent runs for a pipeline, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_runs(&self, pipeline: &PipelineId, limit: usize) -> error::Result<Vec<RunRecord>>;
}

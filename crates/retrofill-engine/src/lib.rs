//! Pipeline engine for retrofill runs.
//!
//! Pages through an ordered source, filters and deduplicates each page as
//! one chunk, and writes the derived records to an append-only destination.

pub mod chunk;
pub mod config;
pub(crate) mod dlq;
pub mod errors;
pub mod execution;
pub mod filter;
pub mod orchestrator;
pub mod pipeline;
pub mod resolve;
pub mod result;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod write;

// Re-export public API for convenience
pub use chunk::ChunkProcessor;
pub use errors::PipelineError;
pub use execution::ExecutionOptions;
pub use filter::{DedupKey, DedupState, RecordFilter};
pub use orchestrator::{check_pipeline, run_pipeline};
pub use pipeline::{ChunkObserver, PipelineRunner};
pub use result::{CheckResult, RunOutcome, RunReport};
pub use write::WriteStrategy;

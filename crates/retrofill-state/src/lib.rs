//! Run-history persistence for the retrofill engine.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for run tracking and dead-letter storage of failed writes.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;

/// Common imports for callers of this crate.
pub mod prelude {
    pub use crate::backend::StateBackend;
    pub use crate::error::StateError;
    pub use crate::sqlite::SqliteStateBackend;
    pub use retrofill_types::envelope::{DlqRecord, Timestamp};
    pub use retrofill_types::state::{PipelineId, RunRecord, RunStats, RunStatus};
}

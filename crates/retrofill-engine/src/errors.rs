//! Fatal pipeline errors.
//!
//! Write failures are not errors at this level: they are recorded per
//! operation in the chunk's write summary and the run continues.

use retrofill_types::cursor::Cursor;
use retrofill_types::error::ConnectorError;

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A page fetch failed. Never retried internally.
    #[error("source unavailable: {0}")]
    SourceUnavailable(ConnectorError),
    /// The source returned a non-empty page without advancing the cursor.
    #[error("source cursor did not advance past {cursor}")]
    CursorStalled { cursor: Cursor },
    /// Invalid or unusable configuration, detected before any fetch.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Host-side failure (state backend, task join).
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PipelineError {
    /// Returns the typed connector error if this is a `SourceUnavailable`.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::SourceUnavailable(e) => Some(e),
            _ => None,
        }
    }

    /// Stable short name, used in reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::CursorStalled { .. } => "cursor_stalled",
            Self::Configuration(_) => "configuration",
            Self::Infrastructure(_) => "infrastructure",
        }
    }

    pub(crate) fn config(connector_ref: &str, err: &ConnectorError) -> Self {
        Self::Configuration(format!("{connector_ref}: {err}"))
    }
}

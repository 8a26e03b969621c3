//! State backend error types.

/// Errors produced by [`StateBackend`](crate::StateBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure, tagged with the operation that hit it.
    #[error("sqlite error in {context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stats could not be encoded or decoded.
    #[error("stats serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Wrap a `SQLite` error with the operation name.
    #[must_use]
    pub fn backend_context(context: &'static str, source: rusqlite::Error) -> Self {
        Self::Sqlite { context, source }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

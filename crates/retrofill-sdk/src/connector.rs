//! Async-first connector traits.
//!
//! The engine is generic over these traits; the CLI picks concrete
//! implementations from pipeline configuration.

use retrofill_types::cursor::Cursor;
use retrofill_types::error::{ConnectorError, ValidationResult};
use retrofill_types::record::{DerivedRecord, Page};

/// Atomic group cap of the observed document-store deployment.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 500;

/// Server-assigned identifier of a created destination entry.
pub type DocumentId = String;

/// Default check response for connectors that do not probe anything.
#[must_use]
pub fn default_check() -> ValidationResult {
    ValidationResult::success("Check not implemented")
}

/// Ordered, cursor-paginated record source.
///
/// Implementations must return records in a stable total order on
/// `(order_key, id)` across calls. A page fetched after cursor `C` contains
/// only records strictly after `C`. `next_cursor` is `None` only at end of
/// data.
#[allow(async_fn_in_trait)]
pub trait RecordSource {
    /// Fetch up to `page_size` records after `cursor` (`None` = from the start).
    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> Result<Page, ConnectorError>;

    /// Largest page the backing store serves in one call, if it has a limit.
    fn max_page_size(&self) -> Option<usize> {
        None
    }

    /// Probe connectivity without consuming records.
    async fn check(&self) -> Result<ValidationResult, ConnectorError> {
        Ok(default_check())
    }
}

/// Append-only destination collection.
///
/// Each created entry receives a server-assigned id and creation timestamp.
/// Existing entries are never read, updated, or deleted through this trait.
#[allow(async_fn_in_trait)]
pub trait Destination {
    /// Create one entry as an independent operation.
    async fn create(&self, record: &DerivedRecord) -> Result<DocumentId, ConnectorError>;

    /// Create all `records` atomically: either every entry is committed or none is.
    ///
    /// Callers never pass more than [`Destination::max_group_size`] records.
    async fn create_group(
        &self,
        records: &[DerivedRecord],
    ) -> Result<Vec<DocumentId>, ConnectorError>;

    /// Largest group [`Destination::create_group`] accepts.
    fn max_group_size(&self) -> usize {
        DEFAULT_MAX_GROUP_SIZE
    }

    /// Probe connectivity without writing.
    async fn check(&self) -> Result<ValidationResult, ConnectorError> {
        Ok(default_check())
    }
}

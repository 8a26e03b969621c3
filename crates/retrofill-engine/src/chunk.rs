//! One chunk: filter a page, write what survives, report counts.

use retrofill_sdk::prelude::*;
use retrofill_types::metric::{ChunkResult, WriteSummary};

use crate::filter::{DedupState, RecordFilter};
use crate::write::WriteStrategy;

/// Filter + write stage over a single page.
pub struct ChunkProcessor<'a, D> {
    filter: &'a RecordFilter,
    strategy: WriteStrategy,
    destination: &'a D,
}

impl<'a, D: Destination> ChunkProcessor<'a, D> {
    #[must_use]
    pub fn new(filter: &'a RecordFilter, strategy: WriteStrategy, destination: &'a D) -> Self {
        Self {
            filter,
            strategy,
            destination,
        }
    }

    #[must_use]
    pub fn strategy(&self) -> WriteStrategy {
        self.strategy
    }

    #[must_use]
    pub fn destination(&self) -> &'a D {
        self.destination
    }

    /// Process `page` as chunk number `chunk` (1-based).
    ///
    /// When nothing is accepted the write stage is skipped and no
    /// destination call is made.
    pub async fn process(&self, chunk: u64, page: &Page, dedup: &mut DedupState) -> ChunkResult {
        let fetched = page.len() as u64;
        tracing::info!(chunk, fetched, "Processing chunk");

        let outcome = self.filter.apply(&page.records, dedup);
        tracing::info!(
            chunk,
            accepted = outcome.counts.accepted,
            duplicates = outcome.counts.duplicates,
            constraint_rejected = outcome.counts.constraint_rejected,
            "Filtered chunk"
        );

        let write = if outcome.accepted.is_empty() {
            WriteSummary::default()
        } else {
            self.strategy
                .execute(self.destination, chunk, &outcome.accepted)
                .await
        };

        tracing::info!(
            chunk,
            succeeded = write.succeeded,
            failed = write.records_failed(),
            operations = write.operations,
            "Chunk complete"
        );

        ChunkResult {
            chunk,
            fetched,
            filter: outcome.counts,
            write,
        }
    }
}

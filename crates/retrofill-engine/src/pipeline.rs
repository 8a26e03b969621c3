//! Cursor loop: fetch a page, process it as a chunk, advance, repeat.
//!
//! Chunks run strictly one after another on the calling task. The loop ends
//! on an empty page, a short page, a missing continuation cursor, the page
//! limit, or cancellation observed before a fetch. A fetch error or a cursor
//! that fails to advance aborts the run; stats up to the last finished chunk
//! are kept in the report either way.

use std::time::Instant;

use retrofill_sdk::prelude::*;
use retrofill_types::metric::ChunkResult;
use retrofill_types::state::RunStats;
use tokio_util::sync::CancellationToken;

use crate::chunk::ChunkProcessor;
use crate::errors::PipelineError;
use crate::filter::DedupState;
use crate::result::{RunOutcome, RunReport};

/// Hook invoked after every finished chunk, in chunk order.
#[allow(async_fn_in_trait)]
pub trait ChunkObserver {
    async fn on_chunk(&mut self, result: &ChunkResult);
}

impl ChunkObserver for () {
    async fn on_chunk(&mut self, _result: &ChunkResult) {}
}

/// Drives one run over a source.
pub struct PipelineRunner<'a, S, D> {
    source: &'a S,
    processor: ChunkProcessor<'a, D>,
    page_size: usize,
    max_pages: Option<u64>,
    cancel: CancellationToken,
}

impl<'a, S: RecordSource, D: Destination> PipelineRunner<'a, S, D> {
    #[must_use]
    pub fn new(source: &'a S, processor: ChunkProcessor<'a, D>, page_size: usize) -> Self {
        Self {
            source,
            processor,
            page_size,
            max_pages: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop after `max_pages` chunks.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: Option<u64>) -> Self {
        self.max_pages = max_pages;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check page size and group size against what the connectors accept.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] when the run could not fetch
    /// or write as configured.
    pub fn preflight(&self) -> Result<(), PipelineError> {
        if self.page_size == 0 {
            return Err(PipelineError::Configuration(
                "page size must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.source.max_page_size() {
            if self.page_size > max {
                return Err(PipelineError::Configuration(format!(
                    "page size {} exceeds the source maximum of {max}",
                    self.page_size
                )));
            }
        }
        self.processor
            .strategy()
            .check_group_cap(self.processor.destination().max_group_size())
            .map_err(PipelineError::Configuration)
    }

    /// Run to completion without a chunk observer.
    pub async fn run(&self) -> RunReport {
        self.run_observed(&mut ()).await
    }

    /// Run to completion, calling `observer` after each chunk.
    pub async fn run_observed<O: ChunkObserver>(&self, observer: &mut O) -> RunReport {
        let started = Instant::now();
        let mut stats = RunStats::default();

        let outcome = match self.preflight() {
            Ok(()) => self.drive(&mut stats, observer).await,
            Err(e) => RunOutcome::Failed(e),
        };

        let duration_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            status = %outcome.status(),
            pages = stats.pages_processed,
            fetched = stats.records_fetched,
            accepted = stats.records_accepted,
            duplicates = stats.duplicates_rejected,
            constraint_rejected = stats.constraint_rejected,
            writes_succeeded = stats.writes_succeeded,
            writes_failed = stats.writes_failed,
            duration_secs,
            "Run finished"
        );
        RunReport::new(stats, outcome, duration_secs)
    }

    async fn drive<O: ChunkObserver>(&self, stats: &mut RunStats, observer: &mut O) -> RunOutcome {
        let mut dedup = DedupState::new();
        let mut cursor: Option<Cursor> = None;
        let mut chunk: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(chunks = chunk, "Cancellation requested, stopping before next fetch");
                return RunOutcome::Cancelled;
            }
            if self.max_pages.is_some_and(|max| chunk >= max) {
                tracing::info!(chunks = chunk, "Page limit reached");
                return RunOutcome::Completed;
            }

            let page = match self.source.fetch_page(cursor.as_ref(), self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(chunk = chunk + 1, error = %e, "Page fetch failed");
                    return RunOutcome::Failed(PipelineError::SourceUnavailable(e));
                }
            };

            if page.is_empty() {
                tracing::info!(chunks = chunk, "Source exhausted");
                return RunOutcome::Completed;
            }
            if let (Some(previous), Some(next)) = (&cursor, &page.next_cursor) {
                if previous == next {
                    tracing::error!(cursor = %previous, "Source cursor did not advance");
                    return RunOutcome::Failed(PipelineError::CursorStalled {
                        cursor: previous.clone(),
                    });
                }
            }

            chunk += 1;
            let result = self.processor.process(chunk, &page, &mut dedup).await;
            stats.merge_chunk(&result);
            observer.on_chunk(&result).await;

            let short = page.len() < self.page_size;
            cursor = page.next_cursor;
            stats.last_cursor.clone_from(&cursor);

            if short || cursor.is_none() {
                tracing::info!(chunks = chunk, "Source exhausted");
                return RunOutcome::Completed;
            }
        }
    }
}

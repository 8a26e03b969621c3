//! Dead-letter persistence for failed writes.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use retrofill_state::StateBackend;
use retrofill_types::envelope::{DlqRecord, Timestamp};
use retrofill_types::metric::{ChunkResult, WriteFailure};
use retrofill_types::state::PipelineId;
use serde_json::Value;

use crate::pipeline::ChunkObserver;

/// One dead-letter row per record covered by each failed operation.
#[must_use]
pub(crate) fn dlq_records(collection: &str, failures: &[WriteFailure]) -> Vec<DlqRecord> {
    let failed_at = Timestamp::new(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
    failures
        .iter()
        .flat_map(|failure| {
            let group_index = failure.group.and_then(|g| u32::try_from(g).ok());
            let error_message = failure.cause.to_string();
            let failed_at = failed_at.clone();
            failure.records.iter().map(move |record| DlqRecord {
                collection: collection.to_string(),
                record_json: Value::Object(record.fields.clone()).to_string(),
                error_message: error_message.clone(),
                error_category: failure.cause.category,
                group_index,
                failed_at: failed_at.clone(),
            })
        })
        .collect()
}

/// Persist DLQ records to the state backend. Failures are logged, never fatal.
pub(crate) fn persist_dlq_records(
    state_backend: &dyn StateBackend,
    pipeline: &PipelineId,
    run_id: i64,
    records: &[DlqRecord],
) -> u64 {
    if records.is_empty() {
        return 0;
    }

    let dlq_count = records.len();

    match state_backend.insert_dlq_records(pipeline, run_id, records) {
        Ok(inserted) => {
            tracing::info!(
                pipeline = pipeline.as_str(),
                dlq_records = inserted,
                "Persisted DLQ records to state backend"
            );
            inserted
        }
        Err(e) => {
            tracing::error!(
                pipeline = pipeline.as_str(),
                dlq_count,
                error = %e,
                "Failed to persist DLQ records"
            );
            0
        }
    }
}

/// Chunk observer that dead-letters each chunk's failed writes.
pub(crate) struct DlqWriter {
    state: Arc<dyn StateBackend>,
    pipeline: PipelineId,
    run_id: i64,
    collection: String,
    persisted: u64,
}

impl DlqWriter {
    pub(crate) fn new(
        state: Arc<dyn StateBackend>,
        pipeline: PipelineId,
        run_id: i64,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            state,
            pipeline,
            run_id,
            collection: collection.into(),
            persisted: 0,
        }
    }

    pub(crate) fn persisted(&self) -> u64 {
        self.persisted
    }
}

impl ChunkObserver for DlqWriter {
    async fn on_chunk(&mut self, result: &ChunkResult) {
        let records = dlq_records(&self.collection, &result.write.failed);
        if records.is_empty() {
            return;
        }
        let state = Arc::clone(&self.state);
        let pipeline = self.pipeline.clone();
        let run_id = self.run_id;
        match tokio::task::spawn_blocking(move || {
            persist_dlq_records(state.as_ref(), &pipeline, run_id, &records)
        })
        .await
        {
            Ok(inserted) => self.persisted += inserted,
            Err(e) => tracing::error!(
                chunk = result.chunk,
                error = %e,
                "DLQ persistence task panicked"
            ),
        }
    }
}

//! Concurrent write stage: individual creates or atomic grouped creates.
//!
//! Every launched operation is awaited and yields its own outcome. A failure
//! is logged and folded into the [`WriteSummary`]; it never cancels sibling
//! operations and never fails the chunk.

use futures_util::stream::{self, StreamExt};
use retrofill_sdk::prelude::*;
use retrofill_types::metric::{WriteFailure, WriteSummary};

use crate::config::types::{DestinationConfig, PipelineWriteMode, ResourceConfig};

/// How accepted records reach the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// One independent create per record.
    Individual { max_in_flight: usize },
    /// Groups of `group_size` committed all-or-nothing.
    Grouped {
        group_size: usize,
        max_in_flight: usize,
    },
}

impl WriteStrategy {
    #[must_use]
    pub fn from_config(destination: &DestinationConfig, resources: &ResourceConfig) -> Self {
        let max_in_flight = resources.max_inflight_writes;
        match destination.write_mode {
            PipelineWriteMode::Individual => Self::Individual { max_in_flight },
            PipelineWriteMode::Grouped => Self::Grouped {
                group_size: destination.group_size,
                max_in_flight,
            },
        }
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        match *self {
            Self::Individual { max_in_flight } | Self::Grouped { max_in_flight, .. } => {
                max_in_flight.max(1)
            }
        }
    }

    /// Check the group size against a destination's atomic cap.
    ///
    /// # Errors
    ///
    /// Returns a description when grouped writes would exceed `cap`.
    pub fn check_group_cap(&self, cap: usize) -> Result<(), String> {
        match *self {
            Self::Grouped { group_size, .. } if group_size == 0 => {
                Err("group size must be at least 1".to_string())
            }
            Self::Grouped { group_size, .. } if group_size > cap => Err(format!(
                "group size {group_size} exceeds the destination's atomic cap of {cap}"
            )),
            _ => Ok(()),
        }
    }

    /// Write `records` and wait for every operation to settle.
    pub async fn execute<D: Destination>(
        &self,
        destination: &D,
        chunk: u64,
        records: &[DerivedRecord],
    ) -> WriteSummary {
        let mut summary = match *self {
            Self::Individual { .. } => self.execute_individual(destination, chunk, records).await,
            Self::Grouped { group_size, .. } => {
                self.execute_grouped(destination, chunk, records, group_size.max(1))
                    .await
            }
        };
        summary.failed.sort_by_key(|f| f.index);
        summary
    }

    async fn execute_individual<D: Destination>(
        &self,
        destination: &D,
        chunk: u64,
        records: &[DerivedRecord],
    ) -> WriteSummary {
        let outcomes: Vec<(usize, Result<DocumentId, ConnectorError>)> =
            stream::iter(records.iter().enumerate())
                .map(|(index, record)| async move { (index, destination.create(record).await) })
                .buffer_unordered(self.max_in_flight())
                .collect()
                .await;

        let mut summary = WriteSummary {
            operations: outcomes.len() as u64,
            ..WriteSummary::default()
        };
        for (index, outcome) in outcomes {
            match outcome {
                Ok(_) => summary.succeeded += 1,
                Err(cause) => {
                    let record = &records[index];
                    tracing::warn!(
                        chunk,
                        index,
                        source_id = %record.source_id,
                        dedup_key = %record.dedup_key,
                        error = %cause,
                        "Write failed"
                    );
                    summary.failed.push(WriteFailure {
                        index,
                        group: None,
                        records: vec![record.clone()],
                        cause,
                    });
                }
            }
        }
        summary
    }

    async fn execute_grouped<D: Destination>(
        &self,
        destination: &D,
        chunk: u64,
        records: &[DerivedRecord],
        group_size: usize,
    ) -> WriteSummary {
        let outcomes: Vec<(usize, &[DerivedRecord], Result<Vec<DocumentId>, ConnectorError>)> =
            stream::iter(records.chunks(group_size).enumerate())
                .map(|(group, members)| async move {
                    (group, members, destination.create_group(members).await)
                })
                .buffer_unordered(self.max_in_flight())
                .collect()
                .await;

        let mut summary = WriteSummary {
            operations: outcomes.len() as u64,
            ..WriteSummary::default()
        };
        for (group, members, outcome) in outcomes {
            match outcome {
                Ok(_) => summary.succeeded += members.len() as u64,
                Err(cause) => {
                    let keys: Vec<&str> = members.iter().map(|r| r.dedup_key.as_str()).collect();
                    tracing::warn!(
                        chunk,
                        group,
                        records = members.len(),
                        dedup_keys = ?keys,
                        error = %cause,
                        "Group write failed"
                    );
                    summary.failed.push(WriteFailure {
                        index: group * group_size,
                        group: Some(group),
                        records: members.to_vec(),
                        cause,
                    });
                }
            }
        }
        summary
    }
}

//! Pipeline orchestrator: resolves connectors, tracks the run, drives the runner.

use std::sync::Arc;

use anyhow::{Context, Result};
use retrofill_sdk::prelude::*;
use retrofill_state::StateBackend;
use retrofill_types::state::PipelineId;
use tokio_util::sync::CancellationToken;

use crate::chunk::ChunkProcessor;
use crate::config::types::PipelineConfig;
use crate::config::validate_pipeline;
use crate::dlq::DlqWriter;
use crate::errors::PipelineError;
use crate::execution::ExecutionOptions;
use crate::filter::RecordFilter;
use crate::pipeline::PipelineRunner;
use crate::resolve::{
    check_state_backend, create_state_backend, resolve_destination, resolve_source,
    ResolvedDestination,
};
use crate::result::{CheckResult, RunReport};
use crate::write::WriteStrategy;

/// Run a pipeline until the source is exhausted, a fatal error occurs, or
/// `cancel` fires.
///
/// Mid-run failures come back inside the report with the stats accumulated
/// so far. `Err` is returned only when the run could not start or its
/// history could not be recorded.
///
/// # Errors
///
/// Returns [`PipelineError::Configuration`] for invalid configuration or
/// unresolvable connectors, and [`PipelineError::Infrastructure`] for state
/// backend failures.
pub async fn run_pipeline(
    config: &PipelineConfig,
    options: &ExecutionOptions,
    cancel: CancellationToken,
) -> Result<RunReport, PipelineError> {
    validate_pipeline(config).map_err(|e| PipelineError::Configuration(format!("{e:#}")))?;
    tracing::info!(
        pipeline = %config.pipeline,
        source = %config.source.use_ref,
        destination = %config.destination.use_ref,
        collection = %config.destination.collection,
        write_mode = ?config.destination.write_mode,
        page_size = config.resources.page_size,
        dry_run = options.dry_run,
        "Starting pipeline run"
    );

    let source = resolve_source(config)?;
    let destination = resolve_destination(config, options.dry_run)?;
    let filter = RecordFilter::from_config(&config.filter, &config.destination);
    let strategy = WriteStrategy::from_config(&config.destination, &config.resources);
    let runner = PipelineRunner::new(
        &source,
        ChunkProcessor::new(&filter, strategy, &destination),
        config.resources.page_size,
    )
    .with_max_pages(options.max_pages)
    .with_cancellation(cancel);
    runner.preflight()?;

    if options.dry_run {
        let mut report = runner.run().await;
        report.dry_run = true;
        if let ResolvedDestination::Discard(discard) = &destination {
            tracing::info!(
                pipeline = %config.pipeline,
                discarded = discard.discarded(),
                "Dry run finished"
            );
        }
        return Ok(report);
    }

    let pipeline_id = PipelineId::new(config.pipeline.clone());
    let state = create_state_backend(config)?;
    let run_id = start_run(Arc::clone(&state), pipeline_id.clone()).await?;
    tracing::info!(pipeline = %config.pipeline, run_id, "Run started");

    let mut dlq = DlqWriter::new(
        Arc::clone(&state),
        pipeline_id,
        run_id,
        config.destination.collection.clone(),
    );
    let mut report = runner.run_observed(&mut dlq).await;
    report.run_id = Some(run_id);
    report.dlq_records = dlq.persisted();

    finalize_run(state, run_id, &report).await?;
    Ok(report)
}

async fn start_run(state: Arc<dyn StateBackend>, pipeline: PipelineId) -> Result<i64, PipelineError> {
    let run_id = tokio::task::spawn_blocking(move || state.start_run(&pipeline))
        .await
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("start_run task panicked: {e}")))?
        .context("Failed to record run start")?;
    Ok(run_id)
}

async fn finalize_run(
    state: Arc<dyn StateBackend>,
    run_id: i64,
    report: &RunReport,
) -> Result<(), PipelineError> {
    let status = report.outcome.status();
    let stats = report.stats.clone();
    let error_message = report.outcome.error().map(ToString::to_string);
    tokio::task::spawn_blocking(move || {
        state.complete_run(run_id, status, &stats, error_message.as_deref())
    })
    .await
    .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("complete_run task panicked: {e}")))?
    .context("Failed to record run completion")?;
    tracing::debug!(run_id, status = %status, "Run recorded");
    Ok(())
}

fn validation_from(result: Result<ValidationResult, ConnectorError>) -> ValidationResult {
    result.unwrap_or_else(|e| ValidationResult::failed(e.to_string()))
}

fn log_validation(role: &str, validation: &ValidationResult) {
    if validation.is_success() {
        tracing::info!(role, message = %validation.message, "Connector check: OK");
    } else {
        tracing::error!(role, message = %validation.message, "Connector check: FAILED");
    }
}

/// Validate configuration and probe the source, destination, and state backend.
///
/// # Errors
///
/// Returns an error only if the configuration itself is invalid; connector
/// problems are reported in the [`CheckResult`].
pub async fn check_pipeline(config: &PipelineConfig) -> Result<CheckResult> {
    tracing::info!(pipeline = %config.pipeline, "Checking pipeline configuration");
    validate_pipeline(config)?;

    let source_validation = match resolve_source(config) {
        Ok(source) => {
            let mut validation = validation_from(source.check().await);
            if let Some(max) = source.max_page_size() {
                if config.resources.page_size > max {
                    validation = ValidationResult::failed(format!(
                        "page size {} exceeds the source maximum of {max}",
                        config.resources.page_size
                    ));
                }
            }
            validation
        }
        Err(e) => ValidationResult::failed(e.to_string()),
    };
    log_validation("source", &source_validation);

    let destination_validation = match resolve_destination(config, false) {
        Ok(destination) => {
            let strategy = WriteStrategy::from_config(&config.destination, &config.resources);
            match strategy.check_group_cap(destination.max_group_size()) {
                Ok(()) => validation_from(destination.check().await),
                Err(msg) => ValidationResult::failed(msg),
            }
        }
        Err(e) => ValidationResult::failed(e.to_string()),
    };
    log_validation("destination", &destination_validation);

    let state_ok = check_state_backend(config);

    Ok(CheckResult {
        source_validation,
        destination_validation,
        state_ok,
    })
}

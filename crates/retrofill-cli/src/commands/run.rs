use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use retrofill_engine::config::{parse_pipeline, validate_pipeline};
use retrofill_engine::{run_pipeline, ExecutionOptions, RunOutcome, RunReport};

/// Exit status for a run stopped by an interrupt.
const EXIT_CANCELLED: u8 = 130;

/// Flags of the `run` command.
pub struct RunArgs {
    pub dry_run: bool,
    pub max_pages: Option<u64>,
    pub page_size: Option<usize>,
    pub json: bool,
}

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(pipeline_path: &Path, args: &RunArgs) -> Result<ExitCode> {
    // 1. Parse pipeline YAML
    let mut config = parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    if let Some(page_size) = args.page_size {
        config.resources.page_size = page_size;
    }

    // 2. Validate
    validate_pipeline(&config)?;

    tracing::info!(
        pipeline = config.pipeline,
        source = config.source.use_ref,
        destination = config.destination.use_ref,
        "Pipeline validated"
    );

    // 3. Run, stopping between chunks on Ctrl-C
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let options = ExecutionOptions {
        dry_run: args.dry_run,
        max_pages: args.max_pages,
    };
    let report = run_pipeline(&config, &options, cancel).await?;

    if args.json {
        let view = report.view(&config.pipeline);
        println!(
            "{}",
            serde_json::to_string_pretty(&view).context("Failed to encode run report")?
        );
    } else {
        print_report(&config.pipeline, &report);
    }

    Ok(ExitCode::from(exit_status(&report.outcome)))
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current chunk");
            cancel.cancel();
        }
    });
}

fn exit_status(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Completed => 0,
        RunOutcome::Cancelled => EXIT_CANCELLED,
        RunOutcome::Failed(_) => 1,
    }
}

fn print_report(pipeline: &str, report: &RunReport) {
    let stats = &report.stats;
    match &report.outcome {
        RunOutcome::Completed => println!("Pipeline '{pipeline}' completed: no more data."),
        RunOutcome::Cancelled => println!(
            "Pipeline '{pipeline}' cancelled after {} chunk(s).",
            stats.pages_processed
        ),
        RunOutcome::Failed(e) => {
            println!("Pipeline '{pipeline}' aborted mid-run: {e}");
            println!("Partial totals up to the last finished chunk:");
        }
    }
    if report.dry_run {
        println!("  (dry run: writes were discarded)");
    }
    println!("  Chunks processed:  {}", stats.pages_processed);
    println!("  Records fetched:   {}", stats.records_fetched);
    println!("  Accepted:          {}", stats.records_accepted);
    println!(
        "  Rejected:          {} (duplicate: {}, constraint: {})",
        stats.records_rejected(),
        stats.duplicates_rejected,
        stats.constraint_rejected
    );
    for (label, count) in &stats.rejected_by_constraint {
        println!("    {label}: {count}");
    }
    println!("  Writes succeeded:  {}", stats.writes_succeeded);
    println!(
        "  Writes failed:     {} ({} operation(s))",
        stats.writes_failed, stats.failed_operations
    );
    if report.dlq_records > 0 {
        println!("  Dead-lettered:     {}", report.dlq_records);
    }
    if let Some(run_id) = report.run_id {
        println!("  Run id:            {run_id}");
    }
    println!("  Duration:          {:.2}s", report.duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrofill_engine::PipelineError;

    #[test]
    fn exit_status_distinguishes_outcomes() {
        assert_eq!(exit_status(&RunOutcome::Completed), 0);
        assert_eq!(exit_status(&RunOutcome::Cancelled), 130);
        assert_eq!(
            exit_status(&RunOutcome::Failed(PipelineError::Configuration("x".into()))),
            1
        );
    }
}

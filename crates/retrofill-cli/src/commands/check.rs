use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use retrofill_types::error::{ValidationResult, ValidationStatus};

use retrofill_engine::check_pipeline;
use retrofill_engine::config::{parse_pipeline, validate_pipeline};

/// Execute the `check` command: validate pipeline config and connector connectivity.
pub async fn execute(pipeline_path: &Path) -> Result<ExitCode> {
    // 1. Parse pipeline YAML
    let config = parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate pipeline structure
    validate_pipeline(&config)?;
    println!("Pipeline structure: OK");

    // 3. Check connectors and state
    let result = check_pipeline(&config).await?;

    // 4. Report results
    print_validation("Source", &result.source_validation);
    print_validation("Destination", &result.destination_validation);

    if result.state_ok {
        println!("State backend:     OK");
    } else {
        println!("State backend:     FAILED");
    }

    if result.is_ok() {
        println!("\nAll checks passed.");
        Ok(ExitCode::SUCCESS)
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn print_validation(label: &str, result: &ValidationResult) {
    let status = match result.status {
        ValidationStatus::Success => "OK",
        ValidationStatus::Failed => "FAILED",
        ValidationStatus::Warning => "WARNING",
    };
    println!("{:18} {}", format!("{label}:"), status);
    if !result.message.is_empty() {
        println!("  {}", result.message);
    }
}

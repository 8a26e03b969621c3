mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "retrofill",
    version,
    about = "Page through a document collection and backfill derived records"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline until the source is exhausted
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Filter and count as usual, but discard every write
        #[arg(long)]
        dry_run: bool,
        /// Stop after this many pages
        #[arg(long)]
        max_pages: Option<u64>,
        /// Override `resources.page_size`
        #[arg(long)]
        page_size: Option<usize>,
        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate pipeline configuration and connectivity
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            pipeline,
            dry_run,
            max_pages,
            page_size,
            json,
        } => {
            let args = commands::run::RunArgs {
                dry_run,
                max_pages,
                page_size,
                json,
            };
            commands::run::execute(&pipeline, &args).await
        }
        Commands::Check { pipeline } => commands::check::execute(&pipeline).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

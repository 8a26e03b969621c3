//! Pipeline run and check result types.

use retrofill_types::error::ValidationResult;
use retrofill_types::state::{RunStats, RunStatus};
use serde::Serialize;

use crate::errors::PipelineError;

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Source reported end of data, or the page limit was reached.
    Completed,
    /// Cancellation was observed before a fetch.
    Cancelled,
    /// Aborted mid-run; stats cover every chunk that finished.
    Failed(PipelineError),
}

impl RunOutcome {
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed => RunStatus::Completed,
            Self::Cancelled => RunStatus::Cancelled,
            Self::Failed(_) => RunStatus::Failed,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Final accounting for a run.
#[derive(Debug)]
pub struct RunReport {
    pub stats: RunStats,
    pub outcome: RunOutcome,
    pub duration_secs: f64,
    /// Run-history id, absent for dry runs.
    pub run_id: Option<i64>,
    pub dry_run: bool,
    /// Failed records persisted to the dead-letter table.
    pub dlq_records: u64,
}

impl RunReport {
    #[must_use]
    pub fn new(stats: RunStats, outcome: RunOutcome, duration_secs: f64) -> Self {
        Self {
            stats,
            outcome,
            duration_secs,
            run_id: None,
            dry_run: false,
            dlq_records: 0,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    /// Serializable view for `--json` output.
    #[must_use]
    pub fn view<'a>(&'a self, pipeline: &'a str) -> RunReportView<'a> {
        let error = self.outcome.error();
        RunReportView {
            pipeline,
            status: self.outcome.status(),
            error_kind: error.map(PipelineError::kind),
            error: error.map(ToString::to_string),
            run_id: self.run_id,
            dry_run: self.dry_run,
            duration_secs: self.duration_secs,
            dlq_records: self.dlq_records,
            stats: &self.stats,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunReportView<'a> {
    pub pipeline: &'a str,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    pub dry_run: bool,
    pub duration_secs: f64,
    pub dlq_records: u64,
    pub stats: &'a RunStats,
}

/// Result of a pipeline check.
#[derive(Debug)]
pub struct CheckResult {
    pub source_validation: ValidationResult,
    pub destination_validation: ValidationResult,
    pub state_ok: bool,
}

impl CheckResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.source_validation.is_success()
            && self.destination_validation.is_success()
            && self.state_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrofill_types::error::ConnectorError;

    #[test]
    fn view_carries_error_and_status() {
        let report = RunReport::new(
            RunStats {
                pages_processed: 2,
                ..RunStats::default()
            },
            RunOutcome::Failed(PipelineError::SourceUnavailable(ConnectorError::quota(
                "RATE_LIMITED",
                "slow down",
            ))),
            1.5,
        );
        let json = serde_json::to_value(report.view("p")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_kind"], "source_unavailable");
        assert_eq!(json["stats"]["pages_processed"], 2);
        assert!(json.get("run_id").is_none());
        assert!(!report.is_completed());
    }

    #[test]
    fn completed_view_has_no_error() {
        let report = RunReport::new(RunStats::default(), RunOutcome::Completed, 0.1);
        let json = serde_json::to_value(report.view("p")).unwrap();
        assert_eq!(json["status"], "completed");
        assert!(json.get("error").is_none());
    }
}

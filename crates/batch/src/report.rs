use chrono::{DateTime, Utc};
use serde::Serialize;

use maidx_core::ExtractionResult;
use maidx_tool_runtime::{JobFailure, Message};

use crate::job::JobState;

/// Terminal record of one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Position in the input collection.
    pub index: usize,
    pub document_id: String,
    pub document_name: String,
    pub state: JobState,
    pub attempts: u32,
    pub outcome: Result<ExtractionResult, JobFailure>,
    /// Messages of the final attempt, when transcripts are kept.
    pub transcript: Option<Vec<Message>>,
}

/// Failure entry for the batch summary.
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary<'a> {
    pub index: usize,
    pub document_id: &'a str,
    pub attempts: u32,
    #[serde(flatten)]
    pub failure: &'a JobFailure,
}

/// Outcome of a whole batch; jobs are listed in input order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    /// Successful results, in input order.
    pub fn results(&self) -> impl Iterator<Item = &ExtractionResult> {
        self.jobs.iter().filter_map(|j| j.outcome.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = FailureSummary<'_>> {
        self.jobs.iter().filter_map(|j| {
            j.outcome.as_ref().err().map(|failure| FailureSummary {
                index: j.index,
                document_id: &j.document_id,
                attempts: j.attempts,
                failure,
            })
        })
    }

    pub fn succeeded(&self) -> usize {
        self.results().count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// JSON summary: counts, per-document provenance and the failure list.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "total": self.total(),
            "succeeded": self.succeeded(),
            "failed": self.failed(),
            "cancelled": self.cancelled,
            "started_at": self.started_at,
            "finished_at": self.finished_at,
            "results": self.results().map(|r| &r.provenance).collect::<Vec<_>>(),
            "failures": self.failures().collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maidx_core::Provenance;
    use maidx_tool_runtime::FailureKind;

    fn job(index: usize, outcome: Result<ExtractionResult, JobFailure>) -> JobReport {
        let state = if outcome.is_ok() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        JobReport {
            index,
            document_id: format!("doc-{index}"),
            document_name: format!("doc-{index}"),
            state,
            attempts: 1,
            outcome,
            transcript: None,
        }
    }

    fn result(index: usize) -> ExtractionResult {
        ExtractionResult::new(
            Default::default(),
            Provenance {
                run_id: Default::default(),
                document_id: format!("doc-{index}"),
                turns: 1,
                tool_calls: 0,
                corrections: 0,
                model: "m".to_string(),
                completed_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_summary_counts() {
        let report = BatchReport {
            jobs: vec![
                job(0, Ok(result(0))),
                job(1, Err(JobFailure::new(FailureKind::DocumentParse, "unreadable"))),
                job(2, Ok(result(2))),
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
            cancelled: false,
        };
        assert_eq!(report.total(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);

        let summary = report.summary();
        assert_eq!(summary["failures"][0]["document_id"], "doc-1");
        assert_eq!(summary["failures"][0]["kind"], "document_parse");
        assert_eq!(summary["results"][1]["document_id"], "doc-2");
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use maidx_core::config::BatchConfig;
use maidx_core::{Document, DocumentParseError, ExtractionResult};
use maidx_tool_runtime::{CancellationFlag, ConversationEngine, FailureKind, JobFailure, Message};

use crate::job::{ExtractionJob, JobState};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::report::{BatchReport, JobReport};
use crate::retry::RetryPolicy;

/// Runs one extraction conversation per document with at most `workers`
/// in flight, re-enqueueing retryable failures with backoff.
pub struct BatchScheduler {
    engine: Arc<ConversationEngine>,
    workers: usize,
    retry: RetryPolicy,
    progress: ProgressSink,
    cancel: CancellationFlag,
    keep_transcripts: bool,
}

struct Counters {
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchScheduler {
    pub fn new(engine: Arc<ConversationEngine>, config: &BatchConfig) -> Self {
        Self {
            engine,
            workers: config.workers.max(1),
            retry: RetryPolicy::from_config(config),
            progress: ProgressSink::default(),
            cancel: CancellationFlag::new(),
            keep_transcripts: false,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_progress(mut self, tx: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = ProgressSink::new(Some(tx));
        self
    }

    /// Share an externally owned flag (e.g. one set by a signal handler).
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn with_transcripts(mut self, keep: bool) -> Self {
        self.keep_transcripts = keep;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every input exactly once. Inputs the parser could not read
    /// fail immediately; the report lists jobs in input order.
    pub async fn run(&self, inputs: Vec<Result<Document, DocumentParseError>>) -> BatchReport {
        let started_at = Utc::now();
        let counters = Counters {
            total: inputs.len(),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        };
        info!(total = counters.total, workers = self.workers, "Batch started");
        self.progress.emit(ProgressEvent::BatchStarted {
            total: counters.total,
        });

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let futures = inputs.into_iter().enumerate().map(|(index, input)| {
            let semaphore = semaphore.clone();
            let counters = &counters;
            async move {
                match input {
                    Ok(document) => {
                        self.run_job(ExtractionJob::new(index, document), &semaphore, counters)
                            .await
                    }
                    Err(e) => self.parse_failure(index, e, counters),
                }
            }
        });
        let jobs = join_all(futures).await;

        let completed = counters.completed.load(Ordering::SeqCst);
        let failed = counters.failed.load(Ordering::SeqCst);
        info!(completed, failed, total = counters.total, "Batch finished");
        self.progress.emit(ProgressEvent::BatchFinished {
            completed,
            failed,
            total: counters.total,
        });

        BatchReport {
            jobs,
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
        }
    }

    async fn run_job(
        &self,
        mut job: ExtractionJob,
        semaphore: &Semaphore,
        counters: &Counters,
    ) -> JobReport {
        loop {
            let permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    let failure = JobFailure::new(FailureKind::Internal, "worker pool closed");
                    return self.finish(job, Err(failure), None, counters);
                }
            };

            let attempt = job.begin_attempt();
            let document_id = job.document().id.clone();
            debug!(index = job.index(), document_id = %document_id, attempt, "Job started");
            self.progress.emit(ProgressEvent::JobStarted {
                index: job.index(),
                document_id: document_id.clone(),
                attempt,
            });

            let run = self.engine.run(job.document().clone(), &self.cancel).await;
            drop(permit);

            let transcript = self
                .keep_transcripts
                .then(|| run.conversation.messages().to_vec());

            let failure = match run.outcome {
                Ok(result) => return self.finish(job, Ok(result), transcript, counters),
                Err(failure) => failure,
            };

            if !failure.is_retryable() || self.cancel.is_cancelled() {
                return self.finish(job, Err(failure), transcript, counters);
            }

            if !self.retry.allows_retry(attempt) {
                let exhausted = JobFailure::new(
                    FailureKind::RetryBudgetExceeded,
                    format!("gave up after {attempt} attempts, last error: {failure}"),
                );
                return self.finish(job, Err(exhausted), transcript, counters);
            }

            let delay = self.retry.delay_for(attempt, failure.retry_after);
            warn!(
                document_id = %document_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retryable failure, re-enqueueing: {}", failure
            );
            self.progress.emit(ProgressEvent::JobRetrying {
                index: job.index(),
                document_id,
                attempt,
                delay_ms: delay.as_millis() as u64,
                reason: failure.to_string(),
            });
            job.requeue();
            tokio::time::sleep(delay).await;
        }
    }

    fn parse_failure(&self, index: usize, error: DocumentParseError, counters: &Counters) -> JobReport {
        let report = JobReport {
            index,
            document_id: error.document_id.clone(),
            document_name: error.document_id.clone(),
            state: JobState::Failed,
            attempts: 0,
            outcome: Err(JobFailure::from(error)),
            transcript: None,
        };
        self.record_terminal(&report, counters);
        report
    }

    fn finish(
        &self,
        mut job: ExtractionJob,
        outcome: Result<ExtractionResult, JobFailure>,
        transcript: Option<Vec<Message>>,
        counters: &Counters,
    ) -> JobReport {
        job.finish(outcome.is_ok());
        let report = JobReport {
            index: job.index(),
            document_id: job.document().id.clone(),
            document_name: job.document().name.clone(),
            state: job.state(),
            attempts: job.attempts(),
            outcome,
            transcript,
        };
        self.record_terminal(&report, counters);
        report
    }

    fn record_terminal(&self, report: &JobReport, counters: &Counters) {
        match &report.outcome {
            Ok(_) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
                info!(
                    index = report.index,
                    document_id = %report.document_id,
                    attempts = report.attempts,
                    "Job succeeded"
                );
            }
            Err(failure) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                info!(
                    index = report.index,
                    document_id = %report.document_id,
                    attempts = report.attempts,
                    kind = %failure.kind,
                    "Job failed: {}", failure.message
                );
            }
        }
        self.progress.emit(ProgressEvent::JobFinished {
            index: report.index,
            document_id: report.document_id.clone(),
            state: report.state,
            completed: counters.completed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            total: counters.total,
        });
    }
}

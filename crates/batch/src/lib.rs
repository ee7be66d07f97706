//! Batch extraction: one conversation per document across a bounded
//! worker pool, with retry/backoff and progress reporting.

pub mod job;
pub mod progress;
pub mod report;
pub mod retry;
pub mod scheduler;

pub use job::{ExtractionJob, JobState};
pub use progress::ProgressEvent;
pub use report::{BatchReport, JobReport};
pub use retry::RetryPolicy;
pub use scheduler::BatchScheduler;

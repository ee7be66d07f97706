use std::sync::Arc;

use serde::{Deserialize, Serialize};

use maidx_core::Document;

/// Lifecycle of one document's extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One input document scheduled for extraction.
///
/// Moves `Pending → Running` per attempt, back to `Pending` when a
/// retryable failure re-enqueues it, and ends in `Succeeded` or `Failed`.
#[derive(Debug)]
pub struct ExtractionJob {
    index: usize,
    document: Arc<Document>,
    state: JobState,
    attempts: u32,
}

impl ExtractionJob {
    pub fn new(index: usize, document: Document) -> Self {
        Self {
            index,
            document: Arc::new(document),
            state: JobState::Pending,
            attempts: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Enter `Running`; returns the 1-based attempt number.
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert!(!self.state.is_terminal(), "job {} already finished", self.index);
        self.state = JobState::Running;
        self.attempts += 1;
        self.attempts
    }

    pub fn requeue(&mut self) {
        self.state = JobState::Pending;
    }

    pub fn finish(&mut self, succeeded: bool) {
        self.state = if succeeded {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut job = ExtractionJob::new(0, Document::from_text("a.txt", "x"));
        assert_eq!(job.state(), JobState::Pending);

        assert_eq!(job.begin_attempt(), 1);
        assert_eq!(job.state(), JobState::Running);
        job.requeue();
        assert_eq!(job.state(), JobState::Pending);

        assert_eq!(job.begin_attempt(), 2);
        job.finish(true);
        assert_eq!(job.state(), JobState::Succeeded);
        assert!(job.state().is_terminal());
        assert_eq!(job.attempts(), 2);
    }
}

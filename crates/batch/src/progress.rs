use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::job::JobState;

/// Live batch progress, delivered on a single append-only channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    BatchStarted {
        total: usize,
    },
    JobStarted {
        index: usize,
        document_id: String,
        attempt: u32,
    },
    JobRetrying {
        index: usize,
        document_id: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// Emitted after every terminal transition.
    JobFinished {
        index: usize,
        document_id: String,
        state: JobState,
        completed: usize,
        failed: usize,
        total: usize,
    },
    BatchFinished {
        completed: usize,
        failed: usize,
        total: usize,
    },
}

/// Optional progress sink; a dropped receiver is not an error.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub(crate) fn new(tx: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

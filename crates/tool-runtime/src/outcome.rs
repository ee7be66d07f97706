//! Failure classification shared by the engine and the batch scheduler.

use crate::provider::LlmError;
use maidx_core::DocumentParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection reset, DNS failure, request timeout or 5xx.
    TransientNetwork,
    RateLimited,
    /// The model endpoint rejected the request for good (auth, 4xx, bad payload).
    ModelError,
    /// The final answer still failed schema verification after the corrective turns.
    SchemaValidation,
    TurnBudgetExceeded,
    /// Retryable failures kept happening until the scheduler gave up.
    RetryBudgetExceeded,
    DocumentParse,
    /// A tool reported a condition that must stop the job.
    ToolFatal,
    Cancelled,
    /// A conversation invariant was violated; indicates a bug.
    Internal,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::RateLimited)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransientNetwork => "TransientNetworkError",
            Self::RateLimited => "RateLimited",
            Self::ModelError => "ModelError",
            Self::SchemaValidation => "SchemaValidationFailure",
            Self::TurnBudgetExceeded => "TurnBudgetExceeded",
            Self::RetryBudgetExceeded => "RetryBudgetExceeded",
            Self::DocumentParse => "DocumentParseError",
            Self::ToolFatal => "ToolFatal",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Wait requested by the endpoint before retrying.
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn from_llm(error: &LlmError) -> Self {
        let kind = match error {
            LlmError::RateLimited { .. } | LlmError::ApiError { status: 429, .. } => {
                FailureKind::RateLimited
            }
            e if e.is_retryable() => FailureKind::TransientNetwork,
            _ => FailureKind::ModelError,
        };
        Self {
            kind,
            message: error.to_string(),
            retry_after: error.retry_after(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<DocumentParseError> for JobFailure {
    fn from(e: DocumentParseError) -> Self {
        Self::new(FailureKind::DocumentParse, e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_errors_classified() {
        let f = JobFailure::from_llm(&LlmError::RateLimited { retry_after_secs: 2 });
        assert_eq!(f.kind, FailureKind::RateLimited);
        assert_eq!(f.retry_after, Some(Duration::from_secs(2)));
        assert!(f.is_retryable());

        let f = JobFailure::from_llm(&LlmError::NetworkError("reset".into()));
        assert_eq!(f.kind, FailureKind::TransientNetwork);

        let f = JobFailure::from_llm(&LlmError::AuthError);
        assert_eq!(f.kind, FailureKind::ModelError);
        assert!(!f.is_retryable());
    }

    #[test]
    fn test_terminal_kinds_not_retryable() {
        for kind in [
            FailureKind::SchemaValidation,
            FailureKind::TurnBudgetExceeded,
            FailureKind::RetryBudgetExceeded,
            FailureKind::DocumentParse,
            FailureKind::Cancelled,
        ] {
            assert!(!kind.is_retryable(), "{kind}");
        }
    }

    #[test]
    fn test_display_and_serde() {
        let f = JobFailure::new(FailureKind::TurnBudgetExceeded, "12 turns used");
        assert_eq!(f.to_string(), "TurnBudgetExceeded: 12 turns used");
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["kind"], "turn_budget_exceeded");
        assert!(json.get("retry_after").is_none());
    }
}

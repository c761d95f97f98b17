use std::path::PathBuf;

use thiserror::Error;

use crate::anthropic::AnthropicError;
use crate::review::AnalysisKind;

/// Orchestration-level faults. Any of these aborts the whole job; no partial
/// report is produced.
#[derive(Debug, Error)]
pub enum BatonError {
    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Corrupt job state: {0}")]
    CorruptState(String),

    #[error("Non-deterministic replay at position {position}: expected {expected}, got {actual}")]
    NonDeterminism {
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("Execution history exceeded {limit} events")]
    HistoryLimitExceeded { limit: usize },

    #[error("No checkpoint found for job {0}")]
    CheckpointNotFound(String),

    #[error("Checkpoint I/O error at {path}: {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single sub-analysis attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("attempt timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),

    #[error("analysis rejected: {0}")]
    Rejected(String),
}

impl AgentError {
    /// Classify the failure for retry decisions.
    pub fn kind(&self) -> FailureKind {
        match self {
            AgentError::RateLimited { .. }
            | AgentError::Timeout { .. }
            | AgentError::InvalidResponse(_) => FailureKind::Transient,
            AgentError::Api { status, .. } if *status >= 500 || *status == 429 => {
                FailureKind::Transient
            }
            AgentError::Api { .. } | AgentError::Rejected(_) => FailureKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

impl From<AnthropicError> for AgentError {
    fn from(err: AnthropicError) -> Self {
        match err {
            AnthropicError::RateLimited { retry_after_ms } => {
                AgentError::RateLimited { retry_after_ms }
            }
            AnthropicError::ApiError { status, message } => AgentError::Api { status, message },
            // Connection-level failures are treated like a 503.
            AnthropicError::NetworkError(e) => AgentError::Api {
                status: 503,
                message: e.to_string(),
            },
        }
    }
}

/// Classifies a sub-analysis failure for retry logic decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, rate limit, server error: worth another attempt.
    Transient,
    /// The request itself is unacceptable; retrying cannot help.
    Permanent,
}

/// An item whose analysis could not be completed after retries.
///
/// This is an item-level outcome, not a job fault: the orchestrator records
/// it as an `ItemFailure` and moves on.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisError {
    pub failures: Vec<KindFailure>,
}

/// One sub-analysis that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct KindFailure {
    pub kind: AnalysisKind,
    pub attempts: u32,
    pub message: String,
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|k| {
                format!(
                    "{} analysis failed after {} attempt(s): {}",
                    k.kind, k.attempts, k.message
                )
            })
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for AnalysisError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(AgentError::RateLimited { retry_after_ms: 100 }.is_retryable());
        assert!(AgentError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(AgentError::InvalidResponse("not json".into()).is_retryable());
        assert!(
            AgentError::Api {
                status: 502,
                message: "bad gateway".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn client_errors_are_permanent() {
        let err = AgentError::Api {
            status: 401,
            message: "Invalid API key".into(),
        };
        assert_eq!(err.kind(), FailureKind::Permanent);
        assert!(!AgentError::Rejected("diff too large".into()).is_retryable());
    }

    #[test]
    fn anthropic_errors_convert() {
        let err: AgentError = AnthropicError::RateLimited {
            retry_after_ms: 5000,
        }
        .into();
        assert_eq!(err, AgentError::RateLimited { retry_after_ms: 5000 });

        let err: AgentError = AnthropicError::ApiError {
            status: 400,
            message: "bad request".into(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn analysis_error_lists_every_failed_kind() {
        let err = AnalysisError {
            failures: vec![
                KindFailure {
                    kind: AnalysisKind::CodeQuality,
                    attempts: 4,
                    message: "API error (status 500): boom".into(),
                },
                KindFailure {
                    kind: AnalysisKind::Security,
                    attempts: 1,
                    message: "analysis rejected: nope".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "code-quality analysis failed after 4 attempt(s): API error (status 500): boom; \
             security analysis failed after 1 attempt(s): analysis rejected: nope"
        );
    }

    #[test]
    fn baton_error_display() {
        let err = BatonError::HistoryLimitExceeded { limit: 51200 };
        assert_eq!(err.to_string(), "Execution history exceeded 51200 events");
        let err = BatonError::InvalidRequest("job id must not be empty".into());
        assert_eq!(err.to_string(), "Invalid job request: job id must not be empty");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BatonError>();
        assert_send_sync::<AgentError>();
    }
}

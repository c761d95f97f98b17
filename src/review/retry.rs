use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::AgentError;
use crate::review::agents::ReviewAgent;
use crate::review::types::{AnalysisKind, ItemVerdict, WorkItem};
use crate::state_machine::RetryConfig;

/// Result of calling one sub-analysis under the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// Attempts made, including the one that produced `result`.
    pub attempts: u32,
    pub result: Result<ItemVerdict, AgentError>,
}

/// Call `agent` for one sub-analysis, bounding every attempt by the
/// configured timeout and retrying transient failures with exponential
/// backoff. A rate limit waits at least as long as the server asked.
pub async fn call_with_retry<A: ReviewAgent>(
    agent: &A,
    kind: AnalysisKind,
    item: &WorkItem,
    retry: &RetryConfig,
) -> AttemptOutcome {
    let max = retry.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match timeout(retry.timeout(), agent.analyze(kind, item)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                timeout_ms: retry.timeout_ms,
            }),
        };

        match result {
            Ok(mut verdict) => {
                verdict.kind = kind;
                return AttemptOutcome {
                    attempts: attempt,
                    result: Ok(verdict),
                };
            }
            Err(err) if err.is_retryable() && attempt < max => {
                let mut delay_ms = retry.delay_for_attempt(attempt);
                if let AgentError::RateLimited { retry_after_ms } = &err {
                    delay_ms = delay_ms.max(*retry_after_ms);
                }
                log_retry(kind, &item.title, attempt, max, &err, delay_ms);
                sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(err) => {
                return AttemptOutcome {
                    attempts: attempt,
                    result: Err(err),
                };
            }
        }
    }
}

fn log_retry(
    kind: AnalysisKind,
    title: &str,
    attempt: u32,
    max: u32,
    err: &AgentError,
    delay_ms: u64,
) {
    warn!(
        %kind,
        title,
        attempt,
        max,
        delay_ms,
        error = %err,
        "sub-analysis failed, retrying"
    );
}

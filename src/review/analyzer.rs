//! Per-item analysis: the three sub-analyses run concurrently, every one
//! under its own retry policy, and are folded into one item outcome.

use crate::error::{AnalysisError, BatonError, KindFailure};
use crate::history::{EventKind, ExecutionHistory, RecordedOutcome};
use crate::review::agents::ReviewAgent;
use crate::review::retry::call_with_retry;
use crate::review::types::{AnalysisKind, ItemReport, Recommendation, ReviewMetadata, WorkItem};
use crate::state_machine::RetryConfig;

/// Result of analysing one item. A failed item is data, not a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Reviewed(ItemReport),
    Failed(AnalysisError),
}

pub struct ItemAnalyzer<A> {
    agent: A,
    retry: RetryConfig,
}

impl<A: ReviewAgent> ItemAnalyzer<A> {
    pub fn new(agent: A, retry: RetryConfig) -> Self {
        Self { agent, retry }
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Analyse the item at `index`, recording every step in `history`.
    ///
    /// Sub-analyses whose outcome is already in the record are not called
    /// again. The item fails when any sub-analysis fails permanently or runs
    /// out of attempts; the other sub-analyses still run to completion.
    pub async fn analyze(
        &self,
        history: &mut ExecutionHistory,
        index: usize,
        item: &WorkItem,
    ) -> Result<ItemOutcome, BatonError> {
        for kind in AnalysisKind::ALL {
            history.record(EventKind::AnalysisScheduled { item: index, kind })?;
        }
        let scheduled_at = history.now();

        let [code, tests, security] =
            AnalysisKind::ALL.map(|kind| history.recorded_outcome(index, kind));
        let (code, tests, security) = tokio::join!(
            self.run_kind(AnalysisKind::CodeQuality, item, code),
            self.run_kind(AnalysisKind::TestQuality, item, tests),
            self.run_kind(AnalysisKind::Security, item, security),
        );

        let mut verdicts = Vec::with_capacity(AnalysisKind::ALL.len());
        let mut failures = Vec::new();
        for (kind, outcome) in AnalysisKind::ALL.into_iter().zip([code, tests, security]) {
            history.record(EventKind::AnalysisStarted {
                item: index,
                kind,
                attempts: outcome.attempts,
            })?;
            match outcome.result {
                Ok(verdict) => {
                    history.record(EventKind::AnalysisCompleted {
                        item: index,
                        kind,
                        verdict: verdict.clone(),
                    })?;
                    verdicts.push(verdict);
                }
                Err(message) => {
                    history.record(EventKind::AnalysisFailed {
                        item: index,
                        kind,
                        error: message.clone(),
                    })?;
                    failures.push(KindFailure {
                        kind,
                        attempts: outcome.attempts,
                        message,
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Ok(ItemOutcome::Failed(AnalysisError { failures }));
        }

        let reviewed_at = history.now();
        let took_ms = (reviewed_at - scheduled_at).num_milliseconds().max(0) as u64;
        Ok(ItemOutcome::Reviewed(ItemReport {
            item_index: index,
            title: item.title.clone(),
            overall: Recommendation::aggregate(&verdicts),
            verdicts,
            metadata: ReviewMetadata {
                reviewed_at,
                took_ms,
                model: self.agent.model_name().to_string(),
            },
        }))
    }

    async fn run_kind(
        &self,
        kind: AnalysisKind,
        item: &WorkItem,
        recorded: Option<RecordedOutcome>,
    ) -> RecordedOutcome {
        if let Some(recorded) = recorded {
            return recorded;
        }
        let outcome = call_with_retry(&self.agent, kind, item, &self.retry).await;
        RecordedOutcome {
            attempts: outcome.attempts,
            result: outcome.result.map_err(|e| e.to_string()),
        }
    }
}

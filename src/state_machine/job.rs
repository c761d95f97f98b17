use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{ItemFailure, JobState};
use crate::error::BatonError;
use crate::review::{ItemReport, WorkItem};

/// Retry behaviour for one sub-analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first. Always at least one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_interval_ms: u64,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_coefficient: f64,
    /// Upper bound for any single delay.
    pub max_interval_ms: u64,
    /// Bound on a single attempt; an attempt running longer is a failure.
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_interval_ms: 5_000,
            backoff_coefficient: 2.0,
            max_interval_ms: 60_000,
            timeout_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after `attempt` failed attempts (1-based) using
    /// exponential backoff: initial * coefficient^(attempt - 1), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_interval_ms as f64 * self.backoff_coefficient.powi(exp);
        if raw.is_finite() {
            (raw as u64).min(self.max_interval_ms)
        } else {
            self.max_interval_ms
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Immutable job input, re-supplied identically to every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    pub items: Vec<WorkItem>,
}

impl JobRequest {
    pub fn new(job_id: impl Into<String>, items: Vec<WorkItem>) -> Self {
        Self {
            job_id: job_id.into(),
            items,
        }
    }

    pub fn total_count(&self) -> usize {
        self.items.len()
    }

    /// Structural checks. A failure here is an orchestration fault.
    pub fn validate(&self) -> Result<(), BatonError> {
        if self.job_id.trim().is_empty() {
            return Err(BatonError::InvalidRequest("job id must not be empty".into()));
        }
        if let Some(index) = self.items.iter().position(|i| i.title.trim().is_empty()) {
            return Err(BatonError::InvalidRequest(format!(
                "item {index} has an empty title"
            )));
        }
        Ok(())
    }
}

/// Terminal output of a job, produced once by the run that finishes the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Number of handoffs; every run after the first is a continuation.
    pub continuation_count: u32,
    pub total_duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub results: Vec<ItemReport>,
    pub failures: Vec<ItemFailure>,
}

impl JobReport {
    /// `final_run_ms` is the last run's own elapsed time; the baton only
    /// carries the time of the runs before it.
    pub fn from_state(
        state: JobState,
        request: &JobRequest,
        completed_at: DateTime<Utc>,
        final_run_ms: u64,
    ) -> Self {
        Self {
            job_id: request.job_id.clone(),
            total_count: request.total_count(),
            success_count: state.success_count,
            failure_count: state.failure_count,
            continuation_count: state.continuation_index,
            total_duration_ms: state.accumulated_duration_ms + final_run_ms,
            started_at: state.started_at,
            completed_at,
            results: state.results,
            failures: state.failures,
        }
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BatonError;
use crate::review::ItemReport;

/// An item whose analysis failed after its sub-analyses exhausted their
/// retries. Failed items are recorded, never requeued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_index: usize,
    pub title: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// The baton: everything a fresh run needs to resume a job exactly where the
/// previous run stopped.
///
/// Invariant: `processed_count == success_count + failure_count ==
/// results.len() + failures.len()`. The only mutators are
/// [`record_success`](Self::record_success) and
/// [`record_failure`](Self::record_failure), which keep it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    /// Index of the next item to process.
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub continuation_index: u32,
    /// Time spent in runs before the current one.
    pub accumulated_duration_ms: u64,
    /// Start of the whole job, set once by the first run.
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub results: Vec<ItemReport>,
    #[serde(default)]
    pub failures: Vec<ItemFailure>,
}

impl JobState {
    /// State for a brand new job. Only the first run calls this.
    pub fn initial(started_at: DateTime<Utc>) -> Self {
        Self {
            processed_count: 0,
            success_count: 0,
            failure_count: 0,
            continuation_index: 0,
            accumulated_duration_ms: 0,
            started_at,
            results: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn record_success(&mut self, report: ItemReport) {
        self.results.push(report);
        self.processed_count += 1;
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, failure: ItemFailure) {
        self.failures.push(failure);
        self.processed_count += 1;
        self.failure_count += 1;
    }

    /// Fold the finishing run's time in and advance to the next continuation.
    pub fn prepare_handoff(&mut self, run_elapsed_ms: u64) {
        self.accumulated_duration_ms += run_elapsed_ms;
        self.continuation_index += 1;
    }

    pub fn is_complete(&self, total: usize) -> bool {
        self.processed_count >= total
    }

    /// Reject a baton that could not have been produced by a correct run,
    /// e.g. one edited by hand or paired with the wrong request.
    pub fn validate(&self, total: usize) -> Result<(), BatonError> {
        if self.success_count + self.failure_count != self.processed_count {
            return Err(BatonError::CorruptState(format!(
                "processed {} != success {} + failure {}",
                self.processed_count, self.success_count, self.failure_count
            )));
        }
        if self.results.len() != self.success_count || self.failures.len() != self.failure_count {
            return Err(BatonError::CorruptState(format!(
                "{} results / {} failures recorded for counts {} / {}",
                self.results.len(),
                self.failures.len(),
                self.success_count,
                self.failure_count
            )));
        }
        if self.processed_count > total {
            return Err(BatonError::CorruptState(format!(
                "processed {} of only {total} items",
                self.processed_count
            )));
        }
        Ok(())
    }
}

/// Phase of a run, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Running,
    Handoff,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Running => write!(f, "RUNNING"),
            RunPhase::Handoff => write!(f, "HANDOFF"),
            RunPhase::Done => write!(f, "DONE"),
        }
    }
}

/// What the run does after recording an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Process the item at this index next.
    Continue(usize),
    /// Stop this run and start a continuation with the carried state.
    Handoff,
    /// Every item has been processed; build the report.
    Done,
}

impl Transition {
    pub fn phase(&self) -> RunPhase {
        match self {
            Transition::Continue(_) => RunPhase::Running,
            Transition::Handoff => RunPhase::Handoff,
            Transition::Done => RunPhase::Done,
        }
    }
}

pub struct StateMachine;

impl StateMachine {
    /// Decide the next step from the baton alone.
    ///
    /// - Cursor at the end of the list: `Done`, even if a handoff was
    ///   requested, since there is no work left to bound.
    /// - Otherwise a requested handoff wins over continuing.
    pub fn next(state: &JobState, total: usize, handoff_requested: bool) -> Transition {
        if state.is_complete(total) {
            Transition::Done
        } else if handoff_requested {
            Transition::Handoff
        } else {
            Transition::Continue(state.processed_count)
        }
    }
}
